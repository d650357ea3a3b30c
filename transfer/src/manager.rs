//! Registry and dispatcher of protocol handlers
//!
//! The manager is built once per run and is immutable afterwards. It picks the handler for a URL,
//! skips downloads and uploads whose destination already exists (unless overwriting is enabled)
//! and stages downloads in `<target>.tmp` so that a target file only ever appears complete.

use common::url::{join_url, name_from_url, split_url, tmp_path};
use common::{Context, Error, ErrorKind, Result, TransferContext};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::instrument;

use crate::custom::CustomFileTransfer;
use crate::http::{HttpFileTransfer, HttpOptions};
use crate::path::PathFileTransfer;
use crate::resolve::{DependencyResolver, LocalRepositoryResolver, ResolveFileTransfer};
use crate::sftp::SftpOptions;
use crate::smb::SmbOptions;
use crate::url::UrlFileTransfer;
use crate::{FileEntry, FileTransfer};

#[derive(Copy, Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub files_downloaded: usize,
    pub bytes_downloaded: u64,
    pub downloads_skipped: usize,
    pub files_uploaded: usize,
    pub bytes_uploaded: u64,
    pub uploads_skipped: usize,
    pub files_deleted: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            files_downloaded: self.files_downloaded + other.files_downloaded,
            bytes_downloaded: self.bytes_downloaded + other.bytes_downloaded,
            downloads_skipped: self.downloads_skipped + other.downloads_skipped,
            files_uploaded: self.files_uploaded + other.files_uploaded,
            bytes_uploaded: self.bytes_uploaded + other.bytes_uploaded,
            uploads_skipped: self.uploads_skipped + other.uploads_skipped,
            files_deleted: self.files_deleted + other.files_deleted,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files downloaded: {}\n\
            bytes downloaded: {}\n\
            downloads skipped: {}\n\
            files uploaded: {}\n\
            bytes uploaded: {}\n\
            uploads skipped: {}\n\
            files deleted: {}",
            self.files_downloaded,
            bytesize::ByteSize(self.bytes_downloaded),
            self.downloads_skipped,
            self.files_uploaded,
            bytesize::ByteSize(self.bytes_uploaded),
            self.uploads_skipped,
            self.files_deleted,
        )
    }
}

#[derive(Debug, Default)]
struct Stats {
    files_downloaded: AtomicUsize,
    bytes_downloaded: AtomicU64,
    downloads_skipped: AtomicUsize,
    files_uploaded: AtomicUsize,
    bytes_uploaded: AtomicU64,
    uploads_skipped: AtomicUsize,
    files_deleted: AtomicUsize,
}

impl Stats {
    fn get(&self) -> Summary {
        Summary {
            files_downloaded: self.files_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            downloads_skipped: self.downloads_skipped.load(Ordering::Relaxed),
            files_uploaded: self.files_uploaded.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            uploads_skipped: self.uploads_skipped.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
        }
    }
}

fn elapsed(started: Instant) -> humantime::FormattedDuration {
    let elapsed = started.elapsed();
    humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64))
}

pub struct FileTransferManager {
    context: Arc<Context>,
    /// priority order, disabled handlers included
    handlers: Vec<Arc<dyn FileTransfer>>,
    disabled: HashSet<String>,
    dependency_resolver: Arc<dyn DependencyResolver>,
    download_overwrite: bool,
    upload_overwrite: bool,
    stats: Stats,
}

impl std::fmt::Debug for FileTransferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|handler| handler.name()).collect();
        f.debug_struct("FileTransferManager")
            .field("handlers", &names)
            .field("disabled", &self.disabled)
            .field("download_overwrite", &self.download_overwrite)
            .field("upload_overwrite", &self.upload_overwrite)
            .finish_non_exhaustive()
    }
}

impl FileTransferManager {
    pub fn builder(context: Arc<Context>) -> FileTransferManagerBuilder {
        FileTransferManagerBuilder::new(context)
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// All registered handlers in dispatch order
    pub fn handlers(&self) -> &[Arc<dyn FileTransfer>] {
        &self.handlers
    }

    fn enabled(&self, handler: &Arc<dyn FileTransfer>) -> bool {
        handler.enabled() && !self.disabled.contains(handler.name())
    }

    /// First enabled handler whose patterns match `url`
    pub fn handling(&self, url: &str) -> Result<Arc<dyn FileTransfer>> {
        self.handlers
            .iter()
            .find(|handler| self.enabled(handler) && handler.handles(url))
            .cloned()
            .ok_or_else(|| Error::handler_not_found(url))
    }

    pub fn named(&self, name: &str) -> Result<Arc<dyn FileTransfer>> {
        self.handlers
            .iter()
            .find(|handler| self.enabled(handler) && handler.name() == name)
            .cloned()
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::HandlerNotFound,
                    anyhow::anyhow!("File transfer named '{name}' not found!"),
                )
            })
    }

    pub fn handles(&self, url: &str) -> bool {
        self.handling(url).is_ok()
    }

    /// Resolver behind the `resolve` handler
    pub fn dependency_resolver(&self) -> &Arc<dyn DependencyResolver> {
        &self.dependency_resolver
    }

    pub fn summary(&self) -> Summary {
        self.stats.get()
    }

    /// Downloads into the temporary directory keeping the name derived from the URL
    pub async fn download(&self, url: &str) -> Result<PathBuf> {
        let target = self.context.temp_dir.join(name_from_url(url));
        self.download_to(url, &target).await?;
        Ok(target)
    }

    pub async fn download_to(&self, url: &str, target: &Path) -> Result<()> {
        let (dir_url, file_name) = split_url(url);
        self.download_from(&dir_url, &file_name, target).await
    }

    pub async fn download_from(&self, dir_url: &str, file_name: &str, target: &Path) -> Result<()> {
        let handler = self.handling(&join_url(dir_url, file_name))?;
        self.download_using(handler.as_ref(), dir_url, file_name, target)
            .await
    }

    /// Download staging: skip or overwrite check, `.tmp` file, rename on success
    #[instrument(skip(self, handler), fields(handler = handler.name()))]
    pub async fn download_using(
        &self,
        handler: &dyn FileTransfer,
        dir_url: &str,
        file_name: &str,
        target: &Path,
    ) -> Result<()> {
        let url = join_url(dir_url, file_name);
        let target = self.context.resolve_path(target);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            if !self.download_overwrite {
                tracing::info!(
                    "Skipping downloading file from URL '{}' to {:?} as it already exists.",
                    url,
                    &target
                );
                self.stats.downloads_skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            tracing::info!(
                "Downloading file from URL '{}' overwrites existing file {:?}.",
                url,
                &target
            );
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .transfer_context(|| format!("cannot create directory {parent:?}"))?;
        }
        let tmp = tmp_path(&target);
        match tokio::fs::remove_file(&tmp).await {
            Err(error) if error.kind() != std::io::ErrorKind::NotFound => {
                return Err(error).transfer_context(|| format!("cannot remove stale file {tmp:?}"));
            }
            _ => {}
        }
        let started = Instant::now();
        handler.download_from(dir_url, file_name, &tmp).await?;
        tokio::fs::rename(&tmp, &target)
            .await
            .transfer_context(|| format!("cannot move {tmp:?} to {target:?}"))?;
        let size = tokio::fs::metadata(&target)
            .await
            .map(|metadata| metadata.len())
            .unwrap_or_default();
        self.stats.files_downloaded.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_downloaded.fetch_add(size, Ordering::Relaxed);
        tracing::info!(
            "Downloaded file from URL '{}' to {:?} in {}",
            url,
            &target,
            elapsed(started)
        );
        Ok(())
    }

    pub async fn upload(&self, url: &str, source: &Path) -> Result<()> {
        let (dir_url, file_name) = split_url(url);
        self.upload_to(&dir_url, &file_name, source).await
    }

    pub async fn upload_to(&self, dir_url: &str, file_name: &str, source: &Path) -> Result<()> {
        let handler = self.handling(&join_url(dir_url, file_name))?;
        self.upload_using(handler.as_ref(), dir_url, file_name, source)
            .await
    }

    /// Upload staging: a `stat` decides whether an existing remote file is kept
    #[instrument(skip(self, handler), fields(handler = handler.name()))]
    pub async fn upload_using(
        &self,
        handler: &dyn FileTransfer,
        dir_url: &str,
        file_name: &str,
        source: &Path,
    ) -> Result<()> {
        let url = join_url(dir_url, file_name);
        let source = self.context.resolve_path(source);
        match handler.stat(dir_url, file_name).await {
            Ok(Some(_)) if !self.upload_overwrite => {
                tracing::info!(
                    "Skipping uploading file to URL '{}' as it already exists on server.",
                    url
                );
                self.stats.uploads_skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Ok(Some(_)) => {
                tracing::info!(
                    "Uploading file from {:?} overwrites existing file at URL '{}'.",
                    &source,
                    url
                );
            }
            Ok(None) => {}
            Err(error) => {
                tracing::debug!(
                    "Cannot check status of uploaded file at URL '{}': {:#}",
                    url,
                    error
                );
            }
        }
        let started = Instant::now();
        handler.upload_to(dir_url, file_name, &source).await?;
        let size = tokio::fs::metadata(&source)
            .await
            .map(|metadata| metadata.len())
            .unwrap_or_default();
        self.stats.files_uploaded.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_uploaded.fetch_add(size, Ordering::Relaxed);
        tracing::info!(
            "Uploaded file from {:?} to URL '{}' in {}",
            &source,
            url,
            elapsed(started)
        );
        Ok(())
    }

    pub async fn list(&self, dir_url: &str) -> Result<Vec<FileEntry>> {
        self.handling(dir_url)?.list(dir_url).await
    }

    pub async fn delete(&self, url: &str) -> Result<()> {
        let (dir_url, file_name) = split_url(url);
        self.delete_from(&dir_url, &file_name).await
    }

    pub async fn delete_from(&self, dir_url: &str, file_name: &str) -> Result<()> {
        self.handling(&join_url(dir_url, file_name))?
            .delete_from(dir_url, file_name)
            .await?;
        self.stats.files_deleted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn truncate(&self, dir_url: &str) -> Result<()> {
        self.handling(dir_url)?.truncate(dir_url).await
    }

    pub async fn stat(&self, dir_url: &str, file_name: &str) -> Result<Option<FileEntry>> {
        self.handling(&join_url(dir_url, file_name))?
            .stat(dir_url, file_name)
            .await
    }

    pub async fn stat_url(&self, url: &str) -> Result<Option<FileEntry>> {
        let (dir_url, file_name) = split_url(url);
        self.stat(&dir_url, &file_name).await
    }
}

pub struct FileTransferManagerBuilder {
    context: Arc<Context>,
    user: Option<String>,
    password: Option<String>,
    domain: Option<String>,
    http: HttpOptions,
    sftp: SftpOptions,
    smb: SmbOptions,
    resolver: Option<Arc<dyn DependencyResolver>>,
    custom: Vec<CustomFileTransfer>,
    disabled: HashSet<String>,
    download_overwrite: bool,
    upload_overwrite: bool,
}

impl FileTransferManagerBuilder {
    pub fn new(context: Arc<Context>) -> Self {
        Self {
            context,
            user: None,
            password: None,
            domain: None,
            http: HttpOptions::default(),
            sftp: SftpOptions::default(),
            smb: SmbOptions::default(),
            resolver: None,
            custom: vec![],
            disabled: HashSet::new(),
            download_overwrite: false,
            upload_overwrite: false,
        }
    }

    /// Sets the credentials of every built-in protocol
    ///
    /// Overrides the credentials of protocol options given so far. Protocol options given later
    /// keep their own credentials and fall back to these where unset.
    pub fn credentials(
        mut self,
        user: Option<String>,
        password: Option<String>,
        domain: Option<String>,
    ) -> Self {
        self.http.user = user.clone();
        self.http.password = password.clone();
        self.sftp.user = user.clone();
        self.sftp.password = password.clone();
        self.smb.user = user.clone();
        self.smb.password = password.clone();
        self.smb.domain = domain.clone();
        self.user = user;
        self.password = password;
        self.domain = domain;
        self
    }

    pub fn http(mut self, options: HttpOptions) -> Self {
        self.http = options;
        self
    }

    pub fn sftp(mut self, options: SftpOptions) -> Self {
        self.sftp = options;
        self
    }

    pub fn smb(mut self, options: SmbOptions) -> Self {
        self.smb = options;
        self
    }

    pub fn dependency_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Registers a handler checked before all built-in ones, in registration order
    pub fn custom(mut self, transfer: CustomFileTransfer) -> Self {
        self.custom.push(transfer);
        self
    }

    pub fn enabled(mut self, name: &str, enabled: bool) -> Self {
        if enabled {
            self.disabled.remove(name);
        } else {
            self.disabled.insert(name.to_string());
        }
        self
    }

    pub fn download_overwrite(mut self, overwrite: bool) -> Self {
        self.download_overwrite = overwrite;
        self
    }

    pub fn upload_overwrite(mut self, overwrite: bool) -> Self {
        self.upload_overwrite = overwrite;
        self
    }

    /// Protocol options with unset credentials taken from [`Self::credentials`]
    fn protocol_options(&self) -> (HttpOptions, SftpOptions, SmbOptions) {
        let mut http = self.http.clone();
        let mut sftp = self.sftp.clone();
        let mut smb = self.smb.clone();
        http.user = http.user.or_else(|| self.user.clone());
        http.password = http.password.or_else(|| self.password.clone());
        sftp.user = sftp.user.or_else(|| self.user.clone());
        sftp.password = sftp.password.or_else(|| self.password.clone());
        smb.user = smb.user.or_else(|| self.user.clone());
        smb.password = smb.password.or_else(|| self.password.clone());
        smb.domain = smb.domain.or_else(|| self.domain.clone());
        (http, sftp, smb)
    }

    pub fn build(self) -> Result<FileTransferManager> {
        let (http, sftp, smb) = self.protocol_options();
        let Self {
            context,
            resolver,
            custom,
            disabled,
            download_overwrite,
            upload_overwrite,
            ..
        } = self;

        let mut handlers: Vec<Arc<dyn FileTransfer>> = vec![];
        for transfer in custom {
            handlers.push(Arc::new(transfer));
        }
        handlers.push(Arc::new(HttpFileTransfer::new(context.clone(), http)?));
        #[cfg(feature = "sftp")]
        handlers.push(Arc::new(crate::sftp::SftpFileTransfer::new(
            context.clone(),
            sftp,
        )?));
        #[cfg(not(feature = "sftp"))]
        tracing::debug!("SFTP support not compiled in, ignoring {:?}", sftp);
        #[cfg(feature = "smb")]
        handlers.push(Arc::new(crate::smb::SmbFileTransfer::new(context.clone(), smb)?));
        #[cfg(not(feature = "smb"))]
        tracing::debug!("SMB support not compiled in, ignoring {:?}", smb);
        let resolver = resolver.unwrap_or_else(|| Arc::new(LocalRepositoryResolver::default()));
        handlers.push(Arc::new(ResolveFileTransfer::new(
            context.clone(),
            resolver.clone(),
            true,
        )?));
        handlers.push(Arc::new(UrlFileTransfer::new(context.clone(), true)?));
        handlers.push(Arc::new(PathFileTransfer::new(context.clone(), true)?));

        Ok(FileTransferManager {
            context,
            handlers,
            disabled,
            dependency_resolver: resolver,
            download_overwrite,
            upload_overwrite,
            stats: Stats::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;
    use tracing_test::traced_test;

    #[test]
    fn common_credentials_override_earlier_protocol_ones() -> anyhow::Result<()> {
        let context = Context::builder().work_dir("/").build()?;
        let builder = FileTransferManager::builder(context)
            .sftp(SftpOptions {
                user: Some("sftp-user".to_string()),
                password: Some("sftp-pass".to_string()),
                ..Default::default()
            })
            .credentials(
                Some("deployer".to_string()),
                Some("secret".to_string()),
                Some("CORP".to_string()),
            )
            .http(HttpOptions {
                user: Some("reader".to_string()),
                ..Default::default()
            });
        let (http, sftp, smb) = builder.protocol_options();
        assert_eq!(sftp.user.as_deref(), Some("deployer"));
        assert_eq!(sftp.password.as_deref(), Some("secret"));
        assert_eq!(smb.user.as_deref(), Some("deployer"));
        assert_eq!(smb.domain.as_deref(), Some("CORP"));
        // given after the common credentials: own user, common password
        assert_eq!(http.user.as_deref(), Some("reader"));
        assert_eq!(http.password.as_deref(), Some("secret"));
        Ok(())
    }

    fn counting_download(calls: Arc<AtomicUsize>, content: &'static str) -> CustomFileTransfer {
        CustomFileTransfer::builder("store")
            .download(move |_, _, target: PathBuf| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::fs::write(&target, content)
                        .await
                        .map_err(Error::transfer)
                }
            })
            .build()
            .unwrap()
    }

    async fn manager_with(
        tmp_dir: &Path,
        custom: CustomFileTransfer,
        overwrite: bool,
    ) -> anyhow::Result<FileTransferManager> {
        let context = Context::builder()
            .work_dir(tmp_dir)
            .temp_dir("tmp")
            .build()?;
        Ok(FileTransferManager::builder(context)
            .custom(custom)
            .download_overwrite(overwrite)
            .upload_overwrite(overwrite)
            .build()?)
    }

    #[tokio::test]
    async fn dispatches_by_pattern_in_priority_order() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = manager_with(tmp_dir.path(), counting_download(calls, ""), false).await?;
        let name = |url: &str| manager.handling(url).map(|handler| handler.name().to_string());
        assert_eq!(name("store://bucket/a.zip")?, "store");
        assert_eq!(name("https://host/a.zip")?, "http");
        assert_eq!(name("http://host/a.zip")?, "http");
        #[cfg(feature = "sftp")]
        assert_eq!(name("sftp://host/a.zip")?, "sftp");
        assert_eq!(name("resolve://org.example:core:2.0")?, "resolve");
        assert_eq!(name("org.example:core:2.0")?, "resolve");
        assert_eq!(name("ftp://host/a.zip")?, "url");
        assert_eq!(name("/srv/dist/a.zip")?, "path");
        assert_eq!(name("dist/a.zip")?, "path");
        Ok(())
    }

    #[tokio::test]
    async fn disabled_handlers_are_skipped() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let context = Context::builder().work_dir(tmp_dir.path()).build()?;
        let manager = FileTransferManager::builder(context)
            .enabled("http", false)
            .enabled("path", false)
            .build()?;
        assert_eq!(manager.handling("https://host/a.zip")?.name(), "url");
        let error = manager.handling("dist/a.zip").err().unwrap();
        assert_eq!(error.kind(), ErrorKind::HandlerNotFound);
        assert_eq!(
            error.to_string(),
            "File transfer supporting URL 'dist/a.zip' not found!"
        );
        assert!(manager.named("http").is_err());
        assert_eq!(manager.named("url")?.name(), "url");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn existing_target_is_not_downloaded_again() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let target = tmp_dir.path().join("a.zip");
        tokio::fs::write(&target, "old").await?;

        let calls = Arc::new(AtomicUsize::new(0));
        let manager =
            manager_with(tmp_dir.path(), counting_download(calls.clone(), "new"), false).await?;
        manager.download_to("store://bucket/a.zip", &target).await?;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(tokio::fs::read_to_string(&target).await?, "old");
        assert_eq!(manager.summary().downloads_skipped, 1);
        assert!(logs_contain("as it already exists"));

        let manager =
            manager_with(tmp_dir.path(), counting_download(calls.clone(), "new"), true).await?;
        manager.download_to("store://bucket/a.zip", &target).await?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(tokio::fs::read_to_string(&target).await?, "new");
        Ok(())
    }

    #[tokio::test]
    async fn failed_download_never_leaves_target() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let broken = CustomFileTransfer::builder("store")
            .download(|_, _, target: PathBuf| async move {
                tokio::fs::write(&target, "partial")
                    .await
                    .map_err(Error::transfer)?;
                Err(Error::transfer(anyhow::anyhow!("connection reset")))
            })
            .build()?;
        let manager = manager_with(tmp_dir.path(), broken, false).await?;
        let target = tmp_dir.path().join("nested/dir/a.zip");
        // a stale staging file from an earlier run is replaced
        tokio::fs::create_dir_all(target.parent().unwrap()).await?;
        tokio::fs::write(tmp_path(&target), "stale").await?;
        let error = manager
            .download_to("store://bucket/a.zip", &target)
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "connection reset");
        assert!(!target.exists());
        assert_eq!(tokio::fs::read_to_string(tmp_path(&target)).await?, "partial");
        Ok(())
    }

    #[tokio::test]
    async fn download_lands_in_temp_dir() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let calls = Arc::new(AtomicUsize::new(0));
        let manager =
            manager_with(tmp_dir.path(), counting_download(calls, "payload"), false).await?;
        let path = manager.download("store://bucket/dist/app.zip?version=2").await?;
        assert_eq!(path, tmp_dir.path().join("tmp/app.zip"));
        assert_eq!(tokio::fs::read_to_string(&path).await?, "payload");
        assert!(!tmp_path(&path).exists());
        assert_eq!(manager.summary().files_downloaded, 1);
        assert_eq!(manager.summary().bytes_downloaded, 7);
        Ok(())
    }

    #[tokio::test]
    async fn existing_remote_file_is_not_uploaded_again() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let source = tmp_dir.path().join("a.zip");
        tokio::fs::write(&source, "content").await?;
        let uploads = Arc::new(AtomicUsize::new(0));
        let counter = uploads.clone();
        let store = CustomFileTransfer::builder("store")
            .stat(|_, file_name: String| async move {
                Ok(Some(FileEntry::new(file_name, 7, UNIX_EPOCH)))
            })
            .upload(move |_, _, _| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build()?;
        let manager = manager_with(tmp_dir.path(), store, false).await?;
        manager.upload("store://bucket/a.zip", &source).await?;
        assert_eq!(uploads.load(Ordering::SeqCst), 0);
        assert_eq!(manager.summary().uploads_skipped, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_stat_does_not_block_upload() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let source = tmp_dir.path().join("a.zip");
        tokio::fs::write(&source, "content").await?;
        let uploads = Arc::new(AtomicUsize::new(0));
        let counter = uploads.clone();
        let store = CustomFileTransfer::builder("store")
            .upload(move |dir_url: String, file_name: String, _| {
                let counter = counter.clone();
                async move {
                    assert_eq!(dir_url, "store://bucket");
                    assert_eq!(file_name, "a.zip");
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build()?;
        let manager = manager_with(tmp_dir.path(), store, false).await?;
        manager.upload("store://bucket/a.zip", &source).await?;
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        assert_eq!(manager.summary().bytes_uploaded, 7);
        Ok(())
    }
}
