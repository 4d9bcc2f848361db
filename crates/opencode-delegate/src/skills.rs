//! Skills: named prompt fragments injected into delegated prompts.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Disables scanning of skills outside the project.
pub const ENV_DISABLE_EXTERNAL_SKILLS: &str = "OPENCODE_DISABLE_EXTERNAL_SKILLS";

/// Overrides the home directory for test isolation.
pub const ENV_TEST_HOME: &str = "OPENCODE_TEST_HOME";

/// A named prompt fragment.
#[derive(Debug, Clone)]
pub struct Skill {
    /// Skill name.
    pub name: String,
    /// Raw skill content.
    pub content: String,
}

/// Source of skills by name. Implemented by the host or by
/// [`FsSkillStore`].
pub trait SkillStore: Send + Sync {
    /// Look up a skill by name. Unknown names are simply absent.
    fn get(&self, name: &str) -> Option<Skill>;
}

/// Render skills as injection blocks:
/// `<skill_content name="{name}">\n{content}\n</skill_content>`,
/// joined by blank lines. Content is trimmed.
#[must_use]
pub fn render_skill_blocks(skills: &[Skill]) -> String {
    skills
        .iter()
        .map(|skill| {
            format!(
                "<skill_content name=\"{}\">\n{}\n</skill_content>",
                skill.name,
                skill.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Filesystem-backed skill store.
///
/// Skills live as `<name>.md` files under `.opencode/skills/` in the
/// project, and under the home directory unless external scanning is
/// disabled. Directories are searched in order; the first hit wins.
#[derive(Debug, Clone)]
pub struct FsSkillStore {
    dirs: Vec<PathBuf>,
}

impl FsSkillStore {
    /// Create a store over explicit directories.
    #[must_use]
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Discover skill directories for a project: the project's own
    /// `.opencode/skills`, then the home-level one unless
    /// `OPENCODE_DISABLE_EXTERNAL_SKILLS` is set. `OPENCODE_TEST_HOME`
    /// overrides the home directory.
    #[must_use]
    pub fn discover(project_root: &Path) -> Self {
        let mut dirs = vec![project_root.join(".opencode").join("skills")];

        if std::env::var(ENV_DISABLE_EXTERNAL_SKILLS).is_err() {
            let home = std::env::var(ENV_TEST_HOME)
                .or_else(|_| std::env::var("HOME"))
                .map(PathBuf::from);
            if let Ok(home) = home {
                dirs.push(home.join(".opencode").join("skills"));
            }
        }

        debug!(?dirs, "skill directories discovered");
        Self { dirs }
    }
}

impl SkillStore for FsSkillStore {
    fn get(&self, name: &str) -> Option<Skill> {
        // Reject path-shaped names outright.
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return None;
        }

        for dir in &self.dirs {
            let path = dir.join(format!("{name}.md"));
            if let Ok(content) = std::fs::read_to_string(&path) {
                return Some(Skill {
                    name: name.to_owned(),
                    content,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_render_single_block() {
        let rendered = render_skill_blocks(&[Skill {
            name: "review".to_owned(),
            content: "\nAlways check error paths.\n\n".to_owned(),
        }]);
        assert_eq!(
            rendered,
            "<skill_content name=\"review\">\nAlways check error paths.\n</skill_content>"
        );
    }

    #[test]
    fn test_render_joins_with_blank_lines() {
        let rendered = render_skill_blocks(&[
            Skill {
                name: "a".to_owned(),
                content: "one".to_owned(),
            },
            Skill {
                name: "b".to_owned(),
                content: "two".to_owned(),
            },
        ]);
        assert!(rendered.contains("</skill_content>\n\n<skill_content name=\"b\">"));
    }

    #[test]
    fn test_fs_store_lookup() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(".opencode/skills");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("review.md"), "check the tests").unwrap();

        let store = FsSkillStore::new(vec![dir]);
        let skill = store.get("review").unwrap();
        assert_eq!(skill.content, "check the tests");
        assert!(store.get("absent").is_none());
    }

    #[test]
    fn test_fs_store_rejects_path_traversal() {
        let tmp = TempDir::new().unwrap();
        let store = FsSkillStore::new(vec![tmp.path().to_path_buf()]);
        assert!(store.get("../etc/passwd").is_none());
    }

    #[test]
    fn test_first_directory_wins() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(first.join("s.md"), "project copy").unwrap();
        std::fs::write(second.join("s.md"), "home copy").unwrap();

        let store = FsSkillStore::new(vec![first, second]);
        assert_eq!(store.get("s").unwrap().content, "project copy");
    }
}
