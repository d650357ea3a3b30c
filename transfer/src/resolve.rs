use async_trait::async_trait;
use common::notation::DependencyNotation;
use common::patterns::Patterns;
use common::url::join_url;
use common::{Context, Error, Result, TransferContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

use crate::{FileDownloader, FileTransfer, TransferKind};

pub const NAME: &str = "resolve";

pub const PROTOCOL: &str = "resolve://";

/// Turns dependency coordinates into a local file
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    async fn resolve(&self, notation: &DependencyNotation) -> Result<PathBuf>;
}

/// Looks artifacts up in Maven-layout repositories on disk
#[derive(Debug, Clone)]
pub struct LocalRepositoryResolver {
    roots: Vec<PathBuf>,
}

impl LocalRepositoryResolver {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// `~/.m2/repository` when the home directory is known
    pub fn maven_local() -> Self {
        Self::new(
            home::home_dir()
                .map(|home| home.join(".m2").join("repository"))
                .into_iter()
                .collect(),
        )
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn artifact_path(root: &Path, notation: &DependencyNotation) -> Option<PathBuf> {
        let version = notation.version.as_deref()?;
        let mut path = root.to_path_buf();
        path.extend(notation.group.split('.'));
        Some(
            path.join(&notation.name)
                .join(version)
                .join(notation.file_name()),
        )
    }
}

impl Default for LocalRepositoryResolver {
    fn default() -> Self {
        Self::maven_local()
    }
}

#[async_trait]
impl DependencyResolver for LocalRepositoryResolver {
    async fn resolve(&self, notation: &DependencyNotation) -> Result<PathBuf> {
        for root in &self.roots {
            let Some(path) = Self::artifact_path(root, notation) else {
                break;
            };
            if tokio::fs::metadata(&path)
                .await
                .is_ok_and(|metadata| metadata.is_file())
            {
                tracing::debug!("resolved {} to {:?}", notation, &path);
                return Ok(path);
            }
        }
        Err(Error::resolution(anyhow::anyhow!(
            "Cannot resolve dependency '{}' in repositories {:?}",
            notation,
            self.roots
        )))
    }
}

/// Resolves `resolve://group:name:version` URLs and bare versioned notations
///
/// Dependency resolution is not safe to run concurrently, so the handler is not parallelable.
pub struct ResolveFileTransfer {
    context: Arc<Context>,
    resolver: Arc<dyn DependencyResolver>,
    protocols: Patterns,
    enabled: bool,
}

impl ResolveFileTransfer {
    pub fn new(
        context: Arc<Context>,
        resolver: Arc<dyn DependencyResolver>,
        enabled: bool,
    ) -> Result<Self> {
        Ok(Self {
            context,
            resolver,
            protocols: Patterns::wildcard(["resolve://*"]).map_err(Error::configuration)?,
            enabled,
        })
    }

    pub fn notation(url: &str) -> Result<DependencyNotation> {
        url.strip_prefix(PROTOCOL)
            .unwrap_or(url)
            .parse::<DependencyNotation>()
            .map_err(Error::resolution)
    }

    /// Location of the artifact without copying it
    pub async fn resolve(&self, url: &str) -> Result<PathBuf> {
        let notation = Self::notation(url)?;
        self.resolver.resolve(&notation).await
    }
}

#[async_trait]
impl FileTransfer for ResolveFileTransfer {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> TransferKind {
        TransferKind::Resolve
    }

    fn protocols(&self) -> &Patterns {
        &self.protocols
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn parallelable(&self) -> bool {
        false
    }

    fn handles(&self, url: &str) -> bool {
        !url.trim().is_empty()
            && (self.protocols.is_match(url) || DependencyNotation::is_versioned(url))
    }

    #[instrument(skip(self))]
    async fn download_from(&self, dir_url: &str, file_name: &str, target: &Path) -> Result<()> {
        let url = join_url(dir_url, file_name);
        let source = self.resolve(&url).await?;
        let context = || format!("Cannot copy resolved file '{}' to '{}'", source.display(), target.display());
        let input = tokio::fs::File::open(&source)
            .await
            .transfer_context(context)?;
        let size = input.metadata().await.ok().map(|metadata| metadata.len());
        FileDownloader::new(&self.context)
            .size(size)
            .download(input, target)
            .await
            .transfer_context(context)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::url::split_url;

    async fn repository() -> anyhow::Result<tempfile::TempDir> {
        let root = tempfile::tempdir()?;
        let dir = root.path().join("org/example/core/2.0");
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("core-2.0.jar"), "core jar").await?;
        tokio::fs::write(dir.join("core-2.0-sources.zip"), "core sources").await?;
        Ok(root)
    }

    #[tokio::test]
    async fn finds_artifacts_in_maven_layout() -> anyhow::Result<()> {
        let root = repository().await?;
        let resolver = LocalRepositoryResolver::new(vec![
            PathBuf::from("/nonexistent"),
            root.path().to_path_buf(),
        ]);
        let path = resolver.resolve(&"org.example:core:2.0".parse()?).await?;
        assert_eq!(path, root.path().join("org/example/core/2.0/core-2.0.jar"));
        let path = resolver
            .resolve(&"org.example:core:2.0:sources@zip".parse()?)
            .await?;
        assert_eq!(
            path,
            root.path().join("org/example/core/2.0/core-2.0-sources.zip")
        );
        let error = resolver
            .resolve(&"org.example:core:3.0".parse()?)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), common::ErrorKind::ResolutionConflict);
        Ok(())
    }

    #[tokio::test]
    async fn copies_resolved_artifact() -> anyhow::Result<()> {
        let root = repository().await?;
        let context = Context::builder().work_dir(root.path()).build()?;
        let resolver = Arc::new(LocalRepositoryResolver::new(vec![root.path().to_path_buf()]));
        let transfer = ResolveFileTransfer::new(context, resolver, true)?;
        assert!(!transfer.parallelable());
        assert!(transfer.handles("org.example:core:2.0"));
        assert!(transfer.handles("resolve://org.example:core:2.0"));
        assert!(!transfer.handles("org.example:core"));
        assert!(!transfer.handles("https://host/core.jar"));

        let target = root.path().join("copy.jar");
        let (dir_url, file_name) = split_url("resolve://org.example:core:2.0");
        transfer.download_from(&dir_url, &file_name, &target).await?;
        assert_eq!(tokio::fs::read_to_string(&target).await?, "core jar");
        Ok(())
    }
}
