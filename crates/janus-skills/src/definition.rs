use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use janus_core::{JanusError, Result};

/// External requirements declared by a skill. Missing requirements make a
/// skill unavailable, not unloadable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requires {
    /// Binaries that must be on PATH.
    pub bins: Vec<String>,
    /// Environment variables that must be set.
    pub env: Vec<String>,
}

/// A skill definition parsed from a SKILL.md file.
///
/// Skills are Markdown documents with YAML frontmatter containing
/// instructions for the LLM. The runtime does not execute skills — the
/// model reads the instructions and uses its tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub name: String,
    /// Short description shown in the system prompt.
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub requires: Requires,
    /// Skills marked `always` are injected in full instead of as a stub.
    #[serde(default)]
    pub always: bool,
    /// The full Markdown body (instructions for the LLM).
    #[serde(skip)]
    pub instructions: String,
    /// Absolute path to the SKILL.md file.
    #[serde(skip)]
    pub location: PathBuf,
}

fn default_version() -> String {
    "1.0.0".into()
}

impl SkillDefinition {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| JanusError::Skill(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&content, path.to_path_buf())
    }

    /// Parse SKILL.md content with a known location.
    pub fn parse(content: &str, location: PathBuf) -> Result<Self> {
        let (frontmatter, body) = split_frontmatter(content)?;
        let mut def = parse_frontmatter(&frontmatter)?;
        def.instructions = body;
        def.location = location;

        if def.name.is_empty() {
            return Err(JanusError::Skill("skill name is empty".into()));
        }
        if def.description.is_empty() {
            return Err(JanusError::Skill(format!(
                "skill '{}' has no description",
                def.name
            )));
        }
        Ok(def)
    }

    /// Requirements not satisfied by the current environment, as
    /// human-readable labels.
    pub fn missing_requirements(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for bin in &self.requires.bins {
            if !bin_on_path(bin) {
                missing.push(format!("bin:{bin}"));
            }
        }
        for var in &self.requires.env {
            if std::env::var_os(var).is_none() {
                missing.push(format!("env:{var}"));
            }
        }
        missing
    }
}

fn bin_on_path(bin: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file())
}

/// Split a SKILL.md file into YAML frontmatter and Markdown body.
fn split_frontmatter(content: &str) -> Result<(String, String)> {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return Err(JanusError::Skill(
            "SKILL.md must start with YAML frontmatter (---)".into(),
        ));
    }

    let after_first = &trimmed[3..];
    let end = after_first.find("\n---").ok_or_else(|| {
        JanusError::Skill("SKILL.md: missing closing --- for frontmatter".into())
    })?;

    let frontmatter = after_first[..end].trim().to_string();
    let body = after_first[end + 4..].trim().to_string();
    Ok((frontmatter, body))
}

/// Parse the frontmatter. Flat `key: value` pairs plus one nested block:
///
/// ```text
/// requires:
///   bins: [git, gh]
///   env: [GITHUB_TOKEN]
/// ```
fn parse_frontmatter(yaml: &str) -> Result<SkillDefinition> {
    let mut def = SkillDefinition {
        name: String::new(),
        description: String::new(),
        version: default_version(),
        requires: Requires::default(),
        always: false,
        instructions: String::new(),
        location: PathBuf::new(),
    };

    let mut in_requires = false;
    for raw in yaml.lines() {
        let line = raw.trim_end();
        if line.trim().is_empty() || line.trim().starts_with('#') {
            continue;
        }

        let indented = raw.starts_with(' ') || raw.starts_with('\t');
        if in_requires && indented {
            if let Some((key, value)) = line.trim().split_once(':') {
                match key.trim() {
                    "bins" => def.requires.bins = parse_list(value),
                    "env" => def.requires.env = parse_list(value),
                    _ => {}
                }
            }
            continue;
        }
        in_requires = false;

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "name" => def.name = unquote(value),
            "description" => def.description = unquote(value),
            "version" => def.version = unquote(value),
            "always" => def.always = matches!(value, "true" | "yes"),
            "requires" => in_requires = value.is_empty(),
            _ => {} // ignore unknown keys
        }
    }

    Ok(def)
}

/// Parse `[a, b]` or `a, b` into a list.
fn parse_list(value: &str) -> Vec<String> {
    value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|v| unquote(v.trim()))
        .filter(|v| !v.is_empty())
        .collect()
}

/// Remove surrounding quotes from a YAML value.
fn unquote(s: &str) -> String {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}
