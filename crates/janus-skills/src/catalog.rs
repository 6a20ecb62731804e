use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::definition::SkillDefinition;
use janus_core::{JanusError, Result};

/// The loaded skill catalog.
///
/// Skills are discovered as directories containing a SKILL.md file across
/// layered search paths with first-source-wins precedence:
/// 1. Workspace skills (`<workspace>/skills/`)
/// 2. User skills (`~/.janus/skills/`)
/// 3. Built-in skills shipped with the binary
pub struct SkillCatalog {
    skills: HashMap<String, SkillDefinition>,
    search_paths: Vec<PathBuf>,
}

impl SkillCatalog {
    /// Create a catalog over search paths in precedence order
    /// (first = highest priority).
    pub fn new(paths: &[&Path]) -> Self {
        Self {
            skills: HashMap::new(),
            search_paths: paths.iter().map(|p| p.to_path_buf()).collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            skills: HashMap::new(),
            search_paths: vec![],
        }
    }

    /// Discover SKILL.md definitions from all search paths. A name already
    /// loaded from a higher-priority path is never overridden.
    pub fn discover(&mut self) -> Result<Vec<String>> {
        let mut loaded = Vec::new();

        for dir in self.search_paths.clone() {
            if !dir.exists() {
                debug!(dir = %dir.display(), "skills directory does not exist, skipping");
                continue;
            }

            let entries = std::fs::read_dir(&dir).map_err(|e| {
                JanusError::Skill(format!("failed to read skills dir {}: {e}", dir.display()))
            })?;

            for entry in entries {
                let entry = entry.map_err(|e| JanusError::Skill(e.to_string()))?;
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let skill_md = path.join("SKILL.md");
                if !skill_md.exists() {
                    continue;
                }

                match SkillDefinition::from_file(&skill_md) {
                    Ok(def) => {
                        if self.skills.contains_key(&def.name) {
                            debug!(
                                skill = %def.name,
                                path = %skill_md.display(),
                                "skill shadowed by a higher-priority source, skipping"
                            );
                            continue;
                        }
                        let missing = def.missing_requirements();
                        if !missing.is_empty() {
                            warn!(
                                skill = %def.name,
                                missing = %missing.join(", "),
                                "skill loaded with unsatisfied requirements"
                            );
                        }
                        info!(skill = %def.name, path = %skill_md.display(), "loaded skill");
                        loaded.push(def.name.clone());
                        self.skills.insert(def.name.clone(), def);
                    }
                    Err(e) => {
                        warn!(path = %skill_md.display(), error = %e, "failed to load skill");
                    }
                }
            }
        }

        Ok(loaded)
    }

    /// Register a definition programmatically (tests, built-ins).
    pub fn register(&mut self, def: SkillDefinition) {
        self.skills.entry(def.name.clone()).or_insert(def);
    }

    pub fn get(&self, name: &str) -> Option<&SkillDefinition> {
        self.skills.get(name)
    }

    /// All skills, name-sorted for deterministic prompt assembly.
    pub fn list(&self) -> Vec<&SkillDefinition> {
        let mut skills: Vec<_> = self.skills.values().collect();
        skills.sort_by_key(|s| &s.name);
        skills
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(dir: &Path, name: &str, description: &str) {
        let skill_dir = dir.join(name);
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(
            skill_dir.join("SKILL.md"),
            format!("---\nname: {name}\ndescription: {description}\n---\n\nInstructions."),
        )
        .unwrap();
    }

    #[test]
    fn discover_loads_skill_directories() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "github", "GitHub workflows");
        write_skill(dir.path(), "docker", "Container management");

        // A directory without SKILL.md is ignored.
        std::fs::create_dir_all(dir.path().join("not-a-skill")).unwrap();

        let mut catalog = SkillCatalog::new(&[dir.path()]);
        let loaded = catalog.discover().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(catalog.get("github").is_some());
        assert!(catalog.get("not-a-skill").is_none());
    }

    #[test]
    fn first_source_wins_across_layers() {
        let workspace = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        write_skill(workspace.path(), "deploy", "Workspace version");
        write_skill(user.path(), "deploy", "User version");
        write_skill(user.path(), "extra", "Only in user dir");

        let mut catalog = SkillCatalog::new(&[workspace.path(), user.path()]);
        catalog.discover().unwrap();

        assert_eq!(catalog.get("deploy").unwrap().description, "Workspace version");
        assert!(catalog.get("extra").is_some());
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn broken_skill_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "good", "Works");
        let bad = dir.path().join("bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("SKILL.md"), "no frontmatter at all").unwrap();

        let mut catalog = SkillCatalog::new(&[dir.path()]);
        let loaded = catalog.discover().unwrap();
        assert_eq!(loaded, vec!["good"]);
    }

    #[test]
    fn list_is_name_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "zeta", "Last");
        write_skill(dir.path(), "alpha", "First");

        let mut catalog = SkillCatalog::new(&[dir.path()]);
        catalog.discover().unwrap();
        let names: Vec<&str> = catalog.list().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn nonexistent_search_path_is_fine() {
        let mut catalog = SkillCatalog::new(&[Path::new("/nonexistent/skills")]);
        assert!(catalog.discover().unwrap().is_empty());
    }
}
