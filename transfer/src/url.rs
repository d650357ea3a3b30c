use async_trait::async_trait;
use common::patterns::Patterns;
use common::url::join_url;
use common::{Context, Error, Result, TransferContext};
use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderValue};
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

use crate::http::{HttpClient, HttpOptions, download_response};
use crate::{FileDownloader, FileTransfer, TransferKind};

pub const NAME: &str = "url";

/// Download-only fallback for any `scheme://` URL
///
/// `file://` reads the local file, `http(s)://` goes through an unauthenticated client with caching
/// disabled. Other schemes have no reader and fail without retrying.
pub struct UrlFileTransfer {
    context: Arc<Context>,
    client: HttpClient,
    protocols: Patterns,
    enabled: bool,
}

impl UrlFileTransfer {
    pub fn new(context: Arc<Context>, enabled: bool) -> Result<Self> {
        Ok(Self {
            context,
            client: HttpClient::new(HttpOptions::default())?,
            protocols: Patterns::wildcard(["*://*"]).map_err(Error::configuration)?,
            enabled,
        })
    }

    async fn fetch(&self, url: &str, target: &Path) -> Result<()> {
        let parsed = ::url::Url::parse(url)
            .map_err(|error| Error::transfer(error).with_retryable(false))?;
        match parsed.scheme() {
            "file" => {
                let path = parsed.to_file_path().map_err(|()| {
                    Error::transfer(anyhow::anyhow!("not a local file URL")).with_retryable(false)
                })?;
                let input = tokio::fs::File::open(&path).await.transfer_context(|| {
                    format!("cannot open {}", path.display())
                })?;
                let size = input.metadata().await.ok().map(|metadata| metadata.len());
                FileDownloader::new(&self.context)
                    .size(size)
                    .download(input, target)
                    .await
                    .map_err(Error::transfer)?;
            }
            "http" | "https" => {
                let mut headers = HeaderMap::new();
                headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                let response = self.client.get(url, headers).await?;
                download_response(&self.context, response, target)
                    .await
                    .map_err(Error::transfer)?;
            }
            scheme => {
                return Err(Error::transfer(anyhow::anyhow!(
                    "no reader for URL scheme '{scheme}'"
                ))
                .with_retryable(false));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FileTransfer for UrlFileTransfer {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> TransferKind {
        TransferKind::Url
    }

    fn protocols(&self) -> &Patterns {
        &self.protocols
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    #[instrument(skip(self))]
    async fn download_from(&self, dir_url: &str, file_name: &str, target: &Path) -> Result<()> {
        let url = join_url(dir_url, file_name);
        tracing::info!("Downloading: {} -> {:?}", url, target);
        self.fetch(&url, target).await.map_err(|error| {
            let retryable = error.retryable;
            Error::transfer(error.cause.context(format!(
                "Cannot download URL '{}' to file '{}'",
                url,
                target.display()
            )))
            .with_retryable(retryable)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Retryable;

    #[tokio::test]
    async fn reads_file_urls() -> anyhow::Result<()> {
        let tmp_dir = common::testutils::setup_test_dir().await?;
        let context = Context::builder().work_dir(tmp_dir.path()).build()?;
        let transfer = UrlFileTransfer::new(context, true)?;
        let dir_url = format!("file://{}", tmp_dir.path().join("store/dist").display());
        let target = tmp_dir.path().join("app.zip");
        transfer.download_from(&dir_url, "app-1.1.zip", &target).await?;
        assert_eq!(tokio::fs::read_to_string(&target).await?, "app 1.1");
        Ok(())
    }

    #[tokio::test]
    async fn unknown_scheme_is_not_retried() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let context = Context::builder().work_dir(tmp_dir.path()).build()?;
        let transfer = UrlFileTransfer::new(context, true)?;
        assert!(transfer.handles("gopher://host/menu"));
        assert!(!transfer.handles("/plain/path"));
        let error = transfer
            .download_from("gopher://host", "menu", &tmp_dir.path().join("menu"))
            .await
            .unwrap_err();
        assert!(!error.is_retryable());
        assert_eq!(
            error.to_string(),
            format!(
                "Cannot download URL 'gopher://host/menu' to file '{}': no reader for URL scheme 'gopher'",
                tmp_dir.path().join("menu").display()
            )
        );
        Ok(())
    }
}
