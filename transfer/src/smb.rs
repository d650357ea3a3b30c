//! SMB/CIFS handler on top of libsmbclient
//!
//! Only built with the `smb` feature. URLs have the shape `smb://host/share/dir`; optional NTLM
//! credentials come from [`SmbOptions`].

pub const NAME: &str = "smb";

#[derive(Debug, Clone)]
pub struct SmbOptions {
    pub enabled: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    pub domain: Option<String>,
}

impl Default for SmbOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            user: None,
            password: None,
            domain: None,
        }
    }
}

/// `smb://host/share/a/b` split into server URL, share and path inside the share
#[cfg_attr(not(feature = "smb"), allow(dead_code))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Location {
    pub server: String,
    pub share: String,
    pub path: String,
}

#[cfg_attr(not(feature = "smb"), allow(dead_code))]
pub(crate) fn location(dir_url: &str) -> Option<Location> {
    let rest = dir_url.strip_prefix("smb://")?;
    let mut parts = rest.splitn(3, '/');
    let host = parts.next().filter(|host| !host.is_empty())?;
    let share = parts.next().filter(|share| !share.is_empty())?;
    let path = parts.next().unwrap_or_default().trim_end_matches('/');
    Some(Location {
        server: format!("smb://{host}"),
        share: format!("/{share}"),
        path: format!("/{path}"),
    })
}

#[cfg(feature = "smb")]
pub use client::SmbFileTransfer;

#[cfg(feature = "smb")]
mod client {
    use async_trait::async_trait;
    use common::patterns::Patterns;
    use common::url::join_url;
    use common::{Context, Error, ErrorKind, Result, TransferContext};
    use pavao::{SmbClient, SmbCredentials, SmbDirentType, SmbOpenOptions};
    use std::path::Path;
    use std::sync::Arc;
    use tracing::instrument;

    use super::{Location, NAME, SmbOptions, location};
    use crate::{FileDownloader, FileEntry, FileTransfer, FileUploader, TransferKind};

    pub struct SmbFileTransfer {
        context: Arc<Context>,
        options: SmbOptions,
        protocols: Patterns,
    }

    fn file_path(dir: &str, file_name: &str) -> String {
        join_url(dir, file_name)
    }

    fn regular_files(client: &SmbClient, dir: &str) -> pavao::SmbResult<Vec<String>> {
        Ok(client
            .list_dir(dir)?
            .into_iter()
            .filter(|entry| entry.get_type() == SmbDirentType::File)
            .map(|entry| entry.name().to_string())
            .collect())
    }

    fn entry(client: &SmbClient, dir: &str, name: &str) -> pavao::SmbResult<FileEntry> {
        let stat = client.stat(file_path(dir, name))?;
        Ok(FileEntry::new(name, stat.size, stat.modified))
    }

    impl SmbFileTransfer {
        pub fn new(context: Arc<Context>, options: SmbOptions) -> Result<Self> {
            Ok(Self {
                context,
                options,
                protocols: Patterns::wildcard(["smb://*"]).map_err(Error::configuration)?,
            })
        }

        fn credentials(&self, location: &Location) -> SmbCredentials {
            let mut credentials = SmbCredentials::default()
                .server(&location.server)
                .share(&location.share);
            if let Some(user) = &self.options.user {
                credentials = credentials.username(user);
            }
            if let Some(password) = &self.options.password {
                credentials = credentials.password(password);
            }
            if let Some(domain) = &self.options.domain {
                credentials = credentials.workgroup(domain);
            }
            credentials
        }

        /// Runs `action` with a client bound to the share and the validated directory path
        async fn connect_dir<T, F>(&self, dir_url: &str, action: F) -> Result<T>
        where
            T: Send + 'static,
            F: FnOnce(&SmbClient, &str) -> Result<T> + Send + 'static,
        {
            let location = location(dir_url).ok_or_else(|| {
                Error::transfer(anyhow::anyhow!("Invalid SMB URL '{dir_url}'")).with_retryable(false)
            })?;
            let credentials = self.credentials(&location);
            let dir_url = dir_url.to_string();
            tokio::task::spawn_blocking(move || {
                let client = SmbClient::new(credentials, pavao::SmbOptions::default())
                    .transfer_context(|| format!("cannot connect to SMB server {}", location.server))?;
                // listing fails for anything but an accessible directory
                client.list_dir(&location.path).transfer_context(|| {
                    format!("Directory at URL '{dir_url}' does not exist or not accessible")
                })?;
                action(&client, &location.path)
            })
            .await
            .map_err(|error| Error::new(ErrorKind::Interrupted, error))?
        }
    }

    #[async_trait]
    impl FileTransfer for SmbFileTransfer {
        fn name(&self) -> &str {
            NAME
        }

        fn kind(&self) -> TransferKind {
            TransferKind::Smb
        }

        fn protocols(&self) -> &Patterns {
            &self.protocols
        }

        fn enabled(&self) -> bool {
            self.options.enabled
        }

        #[instrument(skip(self))]
        async fn download_from(&self, dir_url: &str, file_name: &str, target: &Path) -> Result<()> {
            let url = join_url(dir_url, file_name);
            let file_name = file_name.to_string();
            let target = target.to_path_buf();
            let downloader = FileDownloader::new(&self.context);
            self.connect_dir(dir_url, move |client, dir| {
                let context = || format!("Cannot download file from URL '{url}'");
                let size = entry(client, dir, &file_name).transfer_context(context)?.size;
                let input = client
                    .open_with(file_path(dir, &file_name), SmbOpenOptions::default().read(true))
                    .transfer_context(context)?;
                downloader
                    .size(Some(size))
                    .download_blocking(input, &target)
                    .transfer_context(context)?;
                Ok(())
            })
            .await
        }

        #[instrument(skip(self))]
        async fn upload_to(&self, dir_url: &str, file_name: &str, source: &Path) -> Result<()> {
            let url = join_url(dir_url, file_name);
            let file_name = file_name.to_string();
            let source = source.to_path_buf();
            let uploader = FileUploader::new(&self.context);
            self.connect_dir(dir_url, move |client, dir| {
                let context =
                    || format!("Cannot upload file '{}' to URL '{}'", source.display(), url);
                let path = file_path(dir, &file_name);
                let output = client
                    .open_with(
                        &path,
                        SmbOpenOptions::default().create(true).write(true).truncate(true),
                    )
                    .transfer_context(context)?;
                uploader
                    .upload_blocking(&source, output, || {
                        if let Err(error) = client.unlink(&path) {
                            tracing::debug!("cannot remove partial upload {}: {}", &path, error);
                        }
                    })
                    .transfer_context(context)?;
                Ok(())
            })
            .await
        }

        #[instrument(skip(self))]
        async fn delete_from(&self, dir_url: &str, file_name: &str) -> Result<()> {
            let url = join_url(dir_url, file_name);
            let file_name = file_name.to_string();
            self.connect_dir(dir_url, move |client, dir| {
                client
                    .unlink(file_path(dir, &file_name))
                    .transfer_context(|| format!("Cannot delete file at URL '{url}'"))
            })
            .await
        }

        #[instrument(skip(self))]
        async fn truncate(&self, dir_url: &str) -> Result<()> {
            let url = dir_url.to_string();
            self.connect_dir(dir_url, move |client, dir| {
                let context = || format!("Cannot truncate directory at URL '{url}'");
                for name in regular_files(client, dir).transfer_context(context)? {
                    client
                        .unlink(file_path(dir, &name))
                        .transfer_context(context)?;
                }
                Ok(())
            })
            .await
        }

        #[instrument(skip(self))]
        async fn list(&self, dir_url: &str) -> Result<Vec<FileEntry>> {
            let url = dir_url.to_string();
            self.connect_dir(dir_url, move |client, dir| {
                let context = || format!("Cannot list files in directory at URL '{url}'");
                let mut entries = regular_files(client, dir)
                    .and_then(|names| {
                        names
                            .iter()
                            .map(|name| entry(client, dir, name))
                            .collect::<pavao::SmbResult<Vec<_>>>()
                    })
                    .transfer_context(context)?;
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(entries)
            })
            .await
        }

        #[instrument(skip(self))]
        async fn stat(&self, dir_url: &str, file_name: &str) -> Result<Option<FileEntry>> {
            let url = join_url(dir_url, file_name);
            let file_name = file_name.to_string();
            self.connect_dir(dir_url, move |client, dir| {
                let context = || format!("Cannot check file status at URL '{url}'");
                let names = regular_files(client, dir).transfer_context(context)?;
                if !names.contains(&file_name) {
                    return Ok(None);
                }
                entry(client, dir, &file_name)
                    .map(Some)
                    .transfer_context(context)
            })
            .await
        }
    }
}
