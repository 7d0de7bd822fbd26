//! Prompt resolution
//!
//! The engine never embeds prompt text. A [`PromptResolver`] turns a
//! locator into template text; the step registry only carries locator
//! hints. Two resolvers ship: a filesystem resolver probing
//! `<category>/<subcategory>/<target>/<edition>.md` (adaptation-qualified
//! file first) and an in-memory resolver for tests and embedding.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Addresses one prompt template
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PromptLocator {
    pub category: String,
    pub subcategory: String,
    pub target: String,
    pub edition: String,
    pub adaptation: Option<String>,
}

impl PromptLocator {
    pub fn new(
        category: impl Into<String>,
        subcategory: impl Into<String>,
        target: impl Into<String>,
        edition: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            subcategory: subcategory.into(),
            target: target.into(),
            edition: edition.into(),
            adaptation: None,
        }
    }

    pub fn with_adaptation(mut self, adaptation: impl Into<String>) -> Self {
        self.adaptation = Some(adaptation.into());
        self
    }

    /// Stable key form: `category/subcategory/target/edition[@adaptation]`
    pub fn key(&self) -> String {
        match &self.adaptation {
            Some(adaptation) => format!(
                "{}/{}/{}/{}@{adaptation}",
                self.category, self.subcategory, self.target, self.edition
            ),
            None => format!(
                "{}/{}/{}/{}",
                self.category, self.subcategory, self.target, self.edition
            ),
        }
    }
}

impl fmt::Display for PromptLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no prompt for locator '{0}'")]
    NotFound(String),

    #[error("cannot read prompt {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// External prompt source consulted for base prompts and retry guidance
#[async_trait]
pub trait PromptResolver: Send + Sync {
    async fn resolve(&self, locator: &PromptLocator) -> Result<String, ResolveError>;
}

/// Resolves prompts from a directory tree under a fixed root
///
/// Layout: `<root>/<category>/<subcategory>/<target>/<edition>.md`, with an
/// `<edition>@<adaptation>.md` variant taking precedence when the locator
/// carries an adaptation.
#[derive(Debug, Clone)]
pub struct FsPromptResolver {
    root: PathBuf,
}

impl FsPromptResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn candidates(&self, locator: &PromptLocator) -> Vec<PathBuf> {
        let dir = self
            .root
            .join(&locator.category)
            .join(&locator.subcategory)
            .join(&locator.target);

        let mut paths = Vec::new();
        if let Some(adaptation) = &locator.adaptation {
            paths.push(dir.join(format!("{}@{adaptation}.md", locator.edition)));
        }
        paths.push(dir.join(format!("{}.md", locator.edition)));
        paths
    }
}

#[async_trait]
impl PromptResolver for FsPromptResolver {
    async fn resolve(&self, locator: &PromptLocator) -> Result<String, ResolveError> {
        for path in self.candidates(locator) {
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    debug!("resolve: loaded prompt from {}", path.display());
                    return Ok(text);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(ResolveError::Io {
                        path: path.display().to_string(),
                        source: e,
                    });
                }
            }
        }
        Err(ResolveError::NotFound(locator.key()))
    }
}

/// In-memory resolver keyed by locator key, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticPromptResolver {
    prompts: HashMap<String, String>,
}

impl StaticPromptResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form; `key` is the locator key, adaptation suffix included
    pub fn with(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.prompts.insert(key.into(), text.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.prompts.insert(key.into(), text.into());
    }
}

#[async_trait]
impl PromptResolver for StaticPromptResolver {
    async fn resolve(&self, locator: &PromptLocator) -> Result<String, ResolveError> {
        if locator.adaptation.is_some() {
            if let Some(text) = self.prompts.get(&locator.key()) {
                return Ok(text.clone());
            }
        }
        let plain = PromptLocator {
            adaptation: None,
            ..locator.clone()
        };
        self.prompts
            .get(&plain.key())
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(locator.key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> PromptLocator {
        PromptLocator::new("steps", "issue-flow", "close", "retry")
    }

    #[test]
    fn test_locator_key_forms() {
        assert_eq!(locator().key(), "steps/issue-flow/close/retry");
        assert_eq!(
            locator().with_adaptation("dirty-worktree").key(),
            "steps/issue-flow/close/retry@dirty-worktree"
        );
        assert_eq!(format!("{}", locator()), "steps/issue-flow/close/retry");
    }

    #[tokio::test]
    async fn test_fs_resolver_prefers_adaptation() {
        let dir = tempfile::tempdir().unwrap();
        let prompt_dir = dir.path().join("steps/issue-flow/close");
        std::fs::create_dir_all(&prompt_dir).unwrap();
        std::fs::write(prompt_dir.join("retry.md"), "generic retry").unwrap();
        std::fs::write(prompt_dir.join("retry@dirty-worktree.md"), "adapted retry").unwrap();

        let resolver = FsPromptResolver::new(dir.path());

        let text = resolver
            .resolve(&locator().with_adaptation("dirty-worktree"))
            .await
            .unwrap();
        assert_eq!(text, "adapted retry");

        let text = resolver.resolve(&locator()).await.unwrap();
        assert_eq!(text, "generic retry");
    }

    #[tokio::test]
    async fn test_fs_resolver_falls_back_past_missing_adaptation() {
        let dir = tempfile::tempdir().unwrap();
        let prompt_dir = dir.path().join("steps/issue-flow/close");
        std::fs::create_dir_all(&prompt_dir).unwrap();
        std::fs::write(prompt_dir.join("retry.md"), "generic retry").unwrap();

        let resolver = FsPromptResolver::new(dir.path());

        let text = resolver
            .resolve(&locator().with_adaptation("nonexistent"))
            .await
            .unwrap();
        assert_eq!(text, "generic retry");
    }

    #[tokio::test]
    async fn test_fs_resolver_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FsPromptResolver::new(dir.path());

        let err = resolver.resolve(&locator()).await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
        assert!(err.to_string().contains("steps/issue-flow/close/retry"));
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticPromptResolver::new()
            .with("steps/issue-flow/close/retry", "generic")
            .with("steps/issue-flow/close/retry@dirty-worktree", "adapted");

        let text = resolver
            .resolve(&locator().with_adaptation("dirty-worktree"))
            .await
            .unwrap();
        assert_eq!(text, "adapted");

        // Unknown adaptations fall back to the plain edition
        let text = resolver
            .resolve(&locator().with_adaptation("other"))
            .await
            .unwrap();
        assert_eq!(text, "generic");

        let err = resolver
            .resolve(&PromptLocator::new("steps", "issue-flow", "close", "ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }
}
