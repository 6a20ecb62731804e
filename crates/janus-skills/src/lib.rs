//! SKILL.md catalog: YAML-frontmatter skill definitions discovered across
//! layered search paths (workspace > user-global > built-in), loaded
//! first-source-wins.

pub mod catalog;
pub mod definition;

pub use catalog::SkillCatalog;
pub use definition::{Requires, SkillDefinition};
