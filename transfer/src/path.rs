use async_trait::async_trait;
use common::patterns::Patterns;
use common::url::join_url;
use common::{Context, Error, Result, TransferContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

use crate::{FileDownloader, FileEntry, FileTransfer, FileUploader, TransferKind};

pub const NAME: &str = "path";

/// Local filesystem; matches every URL and therefore comes last in dispatch order
pub struct PathFileTransfer {
    context: Arc<Context>,
    protocols: Patterns,
    enabled: bool,
}

impl PathFileTransfer {
    pub fn new(context: Arc<Context>, enabled: bool) -> Result<Self> {
        Ok(Self {
            context,
            protocols: Patterns::wildcard(["*"]).map_err(Error::configuration)?,
            enabled,
        })
    }

    fn path(&self, url: &str) -> PathBuf {
        let local = url.strip_prefix("file://").unwrap_or(url);
        self.context.resolve_path(local)
    }
}

fn entry(name: String, metadata: &std::fs::Metadata) -> FileEntry {
    FileEntry::new(
        name,
        metadata.len(),
        metadata.modified().unwrap_or(std::time::UNIX_EPOCH),
    )
}

async fn regular_files(dir: &Path) -> std::io::Result<Vec<(PathBuf, std::fs::Metadata)>> {
    let mut files = vec![];
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            files.push((entry.path(), metadata));
        }
    }
    Ok(files)
}

#[async_trait]
impl FileTransfer for PathFileTransfer {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> TransferKind {
        TransferKind::Path
    }

    fn protocols(&self) -> &Patterns {
        &self.protocols
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn handles(&self, _url: &str) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn download_from(&self, dir_url: &str, file_name: &str, target: &Path) -> Result<()> {
        let url = join_url(dir_url, file_name);
        let source = self.path(&url);
        let context = || format!("Cannot download URL '{}' to file '{}'", url, target.display());
        let input = tokio::fs::File::open(&source)
            .await
            .transfer_context(context)?;
        let size = input.metadata().await.transfer_context(context)?.len();
        FileDownloader::new(&self.context)
            .size(Some(size))
            .download(input, target)
            .await
            .transfer_context(context)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn upload_to(&self, dir_url: &str, file_name: &str, source: &Path) -> Result<()> {
        let url = join_url(dir_url, file_name);
        let dir = self.path(dir_url);
        let destination = self.path(&url);
        let context = || format!("Cannot upload file '{}' to URL '{}'", source.display(), url);
        tokio::fs::create_dir_all(&dir)
            .await
            .transfer_context(context)?;
        let output = tokio::fs::File::create(&destination)
            .await
            .transfer_context(context)?;
        FileUploader::new(&self.context)
            .upload(source, output, || {
                if let Err(error) = std::fs::remove_file(&destination) {
                    tracing::debug!("cannot remove partial upload {:?}: {}", &destination, error);
                }
            })
            .await
            .transfer_context(context)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_from(&self, dir_url: &str, file_name: &str) -> Result<()> {
        let url = join_url(dir_url, file_name);
        tokio::fs::remove_file(self.path(&url))
            .await
            .transfer_context(|| format!("Cannot delete file at URL '{url}'"))
    }

    #[instrument(skip(self))]
    async fn truncate(&self, dir_url: &str) -> Result<()> {
        let context = || format!("Cannot truncate directory at URL '{dir_url}'");
        let files = regular_files(&self.path(dir_url))
            .await
            .transfer_context(context)?;
        for (path, _) in files {
            tokio::fs::remove_file(&path)
                .await
                .transfer_context(context)?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, dir_url: &str) -> Result<Vec<FileEntry>> {
        let files = regular_files(&self.path(dir_url))
            .await
            .transfer_context(|| format!("Cannot list files in directory at URL '{dir_url}'"))?;
        let mut entries: Vec<FileEntry> = files
            .into_iter()
            .map(|(path, metadata)| entry(crate::file_name_of(&path), &metadata))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn stat(&self, dir_url: &str, file_name: &str) -> Result<Option<FileEntry>> {
        let url = join_url(dir_url, file_name);
        match tokio::fs::metadata(self.path(&url)).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(entry(file_name.to_string(), &metadata))),
            Ok(_) => Ok(None),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error).transfer_context(|| format!("Cannot check file status at URL '{url}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    async fn setup() -> anyhow::Result<(tempfile::TempDir, PathFileTransfer)> {
        let tmp_dir = common::testutils::setup_test_dir().await?;
        let context = Context::builder().work_dir(tmp_dir.path()).build()?;
        let transfer = PathFileTransfer::new(context, true)?;
        Ok((tmp_dir, transfer))
    }

    #[tokio::test]
    #[traced_test]
    async fn downloads_relative_to_work_dir() -> anyhow::Result<()> {
        let (tmp_dir, transfer) = setup().await?;
        let target = tmp_dir.path().join("copy.zip");
        transfer
            .download_from("store/dist", "app-1.0.zip", &target)
            .await?;
        assert_eq!(tokio::fs::read_to_string(&target).await?, "app 1.0");
        Ok(())
    }

    #[tokio::test]
    async fn download_error_names_url() -> anyhow::Result<()> {
        let (tmp_dir, transfer) = setup().await?;
        let error = transfer
            .download_from("store/dist", "missing.zip", &tmp_dir.path().join("x"))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), common::ErrorKind::TransferFailure);
        assert!(
            error
                .to_string()
                .starts_with("Cannot download URL 'store/dist/missing.zip'"),
            "{error}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn lists_only_regular_files() -> anyhow::Result<()> {
        let (_tmp_dir, transfer) = setup().await?;
        let names: Vec<String> = transfer
            .list("store")
            .await?
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["readme.txt"]);
        let dist = transfer.list("store/dist").await?;
        assert_eq!(dist.len(), 3);
        assert_eq!(dist[0].name, "app-1.0.zip");
        assert_eq!(dist[0].size, 7);
        Ok(())
    }

    #[tokio::test]
    async fn stat_reports_missing_and_directories_as_absent() -> anyhow::Result<()> {
        let (_tmp_dir, transfer) = setup().await?;
        assert!(transfer.stat("store", "nothing.txt").await?.is_none());
        assert!(transfer.stat("store", "dist").await?.is_none());
        let readme = transfer.stat("store", "readme.txt").await?.unwrap();
        assert_eq!(readme.name, "readme.txt");
        assert_eq!(readme.size, 5);
        Ok(())
    }

    #[tokio::test]
    async fn upload_delete_and_truncate() -> anyhow::Result<()> {
        let (tmp_dir, transfer) = setup().await?;
        let source = tmp_dir.path().join("store/lib/core-2.0.jar");
        transfer.upload_to("outbox/nested", "core.jar", &source).await?;
        let uploaded = tmp_dir.path().join("outbox/nested/core.jar");
        assert_eq!(tokio::fs::read_to_string(&uploaded).await?, "core");
        transfer.delete_from("outbox/nested", "core.jar").await?;
        assert!(!uploaded.exists());
        transfer.truncate("store/dist").await?;
        assert!(transfer.list("store/dist").await?.is_empty());
        // directories are kept
        assert!(tmp_dir.path().join("store/lib").is_dir());
        Ok(())
    }
}
