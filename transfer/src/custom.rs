use async_trait::async_trait;
use common::patterns::Patterns;
use common::{Error, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{FileEntry, FileTransfer, TransferKind};

type DownloadFn = Arc<dyn Fn(String, String, PathBuf) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type UploadFn = DownloadFn;
type DeleteFn = Arc<dyn Fn(String, String) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type TruncateFn = Arc<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type ListFn = Arc<dyn Fn(String) -> BoxFuture<'static, Result<Vec<FileEntry>>> + Send + Sync>;
type StatFn =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, Result<Option<FileEntry>>> + Send + Sync>;

/// Handler assembled from user callbacks; operations without a callback are unsupported
///
/// ```
/// use transfer::custom::CustomFileTransfer;
/// use transfer::FileTransfer;
///
/// let vault = CustomFileTransfer::builder("vault")
///     .download(|dir_url, file_name, target| async move {
///         tokio::fs::write(&target, format!("{dir_url}/{file_name}")).await.map_err(common::Error::transfer)
///     })
///     .build()
///     .unwrap();
/// assert!(vault.handles("vault://secrets/app.key"));
/// ```
#[derive(Clone)]
pub struct CustomFileTransfer {
    name: String,
    protocols: Patterns,
    enabled: bool,
    parallelable: bool,
    download: Option<DownloadFn>,
    upload: Option<UploadFn>,
    delete: Option<DeleteFn>,
    truncate: Option<TruncateFn>,
    list: Option<ListFn>,
    stat: Option<StatFn>,
}

impl std::fmt::Debug for CustomFileTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomFileTransfer")
            .field("name", &self.name)
            .field("protocols", &self.protocols.originals())
            .field("enabled", &self.enabled)
            .field("parallelable", &self.parallelable)
            .finish_non_exhaustive()
    }
}

impl CustomFileTransfer {
    pub fn builder(name: impl Into<String>) -> CustomFileTransferBuilder {
        CustomFileTransferBuilder {
            name: name.into(),
            protocols: None,
            enabled: true,
            parallelable: true,
            download: None,
            upload: None,
            delete: None,
            truncate: None,
            list: None,
            stat: None,
        }
    }
}

pub struct CustomFileTransferBuilder {
    name: String,
    protocols: Option<Vec<String>>,
    enabled: bool,
    parallelable: bool,
    download: Option<DownloadFn>,
    upload: Option<UploadFn>,
    delete: Option<DeleteFn>,
    truncate: Option<TruncateFn>,
    list: Option<ListFn>,
    stat: Option<StatFn>,
}

impl CustomFileTransferBuilder {
    /// Defaults to `<name>://*`
    pub fn protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = Some(protocols.into_iter().map(Into::into).collect());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn parallelable(mut self, parallelable: bool) -> Self {
        self.parallelable = parallelable;
        self
    }

    pub fn download<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(String, String, PathBuf) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.download = Some(Arc::new(move |dir_url: String, file_name: String, target: PathBuf| {
            callback(dir_url, file_name, target).boxed()
        }));
        self
    }

    pub fn upload<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(String, String, PathBuf) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.upload = Some(Arc::new(move |dir_url: String, file_name: String, source: PathBuf| {
            callback(dir_url, file_name, source).boxed()
        }));
        self
    }

    pub fn delete<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.delete = Some(Arc::new(move |dir_url: String, file_name: String| {
            callback(dir_url, file_name).boxed()
        }));
        self
    }

    pub fn truncate<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.truncate = Some(Arc::new(move |dir_url: String| callback(dir_url).boxed()));
        self
    }

    pub fn list<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<FileEntry>>> + Send + 'static,
    {
        self.list = Some(Arc::new(move |dir_url: String| callback(dir_url).boxed()));
        self
    }

    pub fn stat<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<FileEntry>>> + Send + 'static,
    {
        self.stat = Some(Arc::new(move |dir_url: String, file_name: String| {
            callback(dir_url, file_name).boxed()
        }));
        self
    }

    pub fn build(self) -> Result<CustomFileTransfer> {
        let protocols = self
            .protocols
            .unwrap_or_else(|| vec![format!("{}://*", self.name)]);
        Ok(CustomFileTransfer {
            protocols: Patterns::wildcard(protocols).map_err(Error::configuration)?,
            name: self.name,
            enabled: self.enabled,
            parallelable: self.parallelable,
            download: self.download,
            upload: self.upload,
            delete: self.delete,
            truncate: self.truncate,
            list: self.list,
            stat: self.stat,
        })
    }
}

#[async_trait]
impl FileTransfer for CustomFileTransfer {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransferKind {
        TransferKind::Custom
    }

    fn protocols(&self) -> &Patterns {
        &self.protocols
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn parallelable(&self) -> bool {
        self.parallelable
    }

    async fn download_from(&self, dir_url: &str, file_name: &str, target: &Path) -> Result<()> {
        match &self.download {
            Some(callback) => {
                callback(dir_url.to_string(), file_name.to_string(), target.to_path_buf()).await
            }
            None => Err(Error::unsupported(&self.name, "download")),
        }
    }

    async fn upload_to(&self, dir_url: &str, file_name: &str, source: &Path) -> Result<()> {
        match &self.upload {
            Some(callback) => {
                callback(dir_url.to_string(), file_name.to_string(), source.to_path_buf()).await
            }
            None => Err(Error::unsupported(&self.name, "upload")),
        }
    }

    async fn delete_from(&self, dir_url: &str, file_name: &str) -> Result<()> {
        match &self.delete {
            Some(callback) => callback(dir_url.to_string(), file_name.to_string()).await,
            None => Err(Error::unsupported(&self.name, "delete")),
        }
    }

    async fn truncate(&self, dir_url: &str) -> Result<()> {
        match &self.truncate {
            Some(callback) => callback(dir_url.to_string()).await,
            None => Err(Error::unsupported(&self.name, "truncate")),
        }
    }

    async fn list(&self, dir_url: &str) -> Result<Vec<FileEntry>> {
        match &self.list {
            Some(callback) => callback(dir_url.to_string()).await,
            None => Err(Error::unsupported(&self.name, "list")),
        }
    }

    async fn stat(&self, dir_url: &str, file_name: &str) -> Result<Option<FileEntry>> {
        match &self.stat {
            Some(callback) => callback(dir_url.to_string(), file_name.to_string()).await,
            None => Err(Error::unsupported(&self.name, "stat")),
        }
    }
}
