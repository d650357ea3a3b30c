//! Wildcard matching for protocol dispatch, group selection and local file lookup
//!
//! Two flavours are supported:
//!
//! - [`Patterns::wildcard`]: `*` matches anything including `/`, used for URLs (`sftp://*`) and
//!   group names
//! - [`Patterns::paths`]: `*` stops at `/` and `**` crosses directories, used for files
//!   relative to a directory (`**/*.jar`)
//!
//! ```
//! use common::patterns::Patterns;
//!
//! let http = Patterns::wildcard(["http://*", "https://*"]).unwrap();
//! assert!(http.is_match("https://example.com/files/app.zip"));
//! assert!(!http.is_match("sftp://example.com/files/app.zip"));
//! ```

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Patterns {
    originals: Vec<String>,
    set: globset::GlobSet,
}

impl Patterns {
    pub fn wildcard<I, S>(patterns: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(patterns, false)
    }

    pub fn paths<I, S>(patterns: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(patterns, true)
    }

    fn build<I, S>(patterns: I, literal_separator: bool) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = globset::GlobSetBuilder::new();
        let mut originals = vec![];
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = globset::GlobBuilder::new(pattern)
                .literal_separator(literal_separator)
                .build()
                .with_context(|| format!("invalid glob pattern: {pattern}"))?;
            builder.add(glob);
            originals.push(pattern.to_string());
        }
        let set = builder
            .build()
            .with_context(|| format!("cannot compile patterns {originals:?}"))?;
        Ok(Self { originals, set })
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.set.is_match(value)
    }

    pub fn is_match_path(&self, path: &std::path::Path) -> bool {
        self.set.is_match(path)
    }

    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }

    pub fn originals(&self) -> &[String] {
        &self.originals
    }
}

impl Default for Patterns {
    fn default() -> Self {
        Self {
            originals: vec![],
            set: globset::GlobSet::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_crosses_slashes() -> anyhow::Result<()> {
        let any_url = Patterns::wildcard(["*://*"])?;
        assert!(any_url.is_match("https://host/a/b/c.zip"));
        assert!(any_url.is_match("resolve://group:name:1.0"));
        assert!(!any_url.is_match("/tmp/file.zip"));
        Ok(())
    }

    #[test]
    fn path_patterns_respect_directories() -> anyhow::Result<()> {
        let jars = Patterns::paths(["**/*.jar", "*.zip"])?;
        assert!(jars.is_match("app.jar"));
        assert!(jars.is_match("lib/nested/app.jar"));
        assert!(jars.is_match("bundle.zip"));
        assert!(!jars.is_match("nested/bundle.zip"));
        Ok(())
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let error = Patterns::wildcard(["a[b"]).unwrap_err();
        assert!(error.to_string().contains("invalid glob pattern: a[b"));
    }

    #[test]
    fn empty_patterns_match_nothing() {
        let patterns = Patterns::default();
        assert!(patterns.is_empty());
        assert!(!patterns.is_match("anything"));
    }
}
