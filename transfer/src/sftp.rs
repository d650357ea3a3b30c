//! SFTP handler on top of libssh2
//!
//! Each operation opens its own session on the blocking thread pool: TCP connect with timeout,
//! SSH handshake, password (or "none") authentication, SFTP channel, the operation itself and a
//! disconnect regardless of the outcome. User info embedded in the URL takes precedence over the
//! configured credentials.

use std::time::Duration;

pub const NAME: &str = "sftp";

pub const DEFAULT_PORT: u16 = 22;

#[derive(Debug, Clone)]
pub struct SftpOptions {
    pub enabled: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    pub port: u16,
    pub timeout: Duration,
}

impl Default for SftpOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            user: None,
            password: None,
            port: DEFAULT_PORT,
            timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(feature = "sftp")]
pub use client::SftpFileTransfer;

#[cfg(feature = "sftp")]
mod client {
    use async_trait::async_trait;
    use common::patterns::Patterns;
    use common::url::join_url;
    use common::{Context, Error, ErrorKind, Result, TransferContext};
    use std::net::{TcpStream, ToSocketAddrs};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tracing::instrument;

    use super::{NAME, SftpOptions};
    use crate::{FileDownloader, FileEntry, FileTransfer, FileUploader, TransferKind};

    // SSH_FX_NO_SUCH_FILE, SSH_FX_NO_SUCH_PATH
    const STATUS_NOT_EXISTS: [i32; 2] = [2, 10];

    #[derive(Debug, Clone)]
    struct Location {
        host: String,
        port: u16,
        user: String,
        password: Option<String>,
        path: PathBuf,
    }

    pub struct SftpFileTransfer {
        context: Arc<Context>,
        options: SftpOptions,
        protocols: Patterns,
    }

    fn current_user() -> String {
        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "anonymous".to_string())
    }

    fn is_not_found(error: &ssh2::Error) -> bool {
        matches!(error.code(), ssh2::ErrorCode::SFTP(code) if STATUS_NOT_EXISTS.contains(&code))
    }

    fn modified(stat: &ssh2::FileStat) -> std::time::SystemTime {
        std::time::UNIX_EPOCH + Duration::from_secs(stat.mtime.unwrap_or_default())
    }

    fn connect(location: &Location, timeout: Duration) -> Result<ssh2::Session> {
        let address = format!("{}:{}", location.host, location.port);
        let context = || {
            format!("SFTP file transfer error (check credentials, network / VPN etc), server {address}")
        };
        let socket = address
            .to_socket_addrs()
            .transfer_context(context)?
            .next()
            .ok_or_else(|| Error::transfer(anyhow::anyhow!("cannot resolve address {address}")))?;
        let tcp = TcpStream::connect_timeout(&socket, timeout).transfer_context(context)?;
        let mut session = ssh2::Session::new().transfer_context(context)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().transfer_context(context)?;
        match location.password.as_deref().filter(|password| !password.is_empty()) {
            Some(password) => session
                .userauth_password(&location.user, password)
                .transfer_context(context)?,
            None => {
                // asking for methods performs "none" authentication
                let methods = session.auth_methods(&location.user).transfer_context(context)?;
                tracing::debug!("SFTP server {} offers authentication: {}", address, methods);
            }
        }
        if !session.authenticated() {
            return Err(Error::transfer(anyhow::anyhow!(
                "SFTP authentication of user '{}' at {} failed",
                location.user,
                address
            ))
            .with_retryable(false));
        }
        Ok(session)
    }

    fn regular_files(sftp: &ssh2::Sftp, dir: &Path) -> Result<Vec<(String, ssh2::FileStat)>, ssh2::Error> {
        Ok(sftp
            .readdir(dir)?
            .into_iter()
            .filter(|(_, stat)| stat.is_file())
            .map(|(path, stat)| (crate::file_name_of(&path), stat))
            .collect())
    }

    impl SftpFileTransfer {
        pub fn new(context: Arc<Context>, options: SftpOptions) -> Result<Self> {
            Ok(Self {
                context,
                options,
                protocols: Patterns::wildcard(["sftp://*"]).map_err(Error::configuration)?,
            })
        }

        fn location(&self, dir_url: &str) -> Result<Location> {
            let invalid = |reason: &str| {
                Error::transfer(anyhow::anyhow!("Invalid SFTP URL '{dir_url}': {reason}"))
                    .with_retryable(false)
            };
            let url = ::url::Url::parse(dir_url).map_err(|error| invalid(&error.to_string()))?;
            let host = url
                .host_str()
                .filter(|host| !host.is_empty())
                .ok_or_else(|| invalid("missing host"))?
                .to_string();
            let decode = |value: &str| {
                percent_encoding::percent_decode_str(value)
                    .decode_utf8()
                    .map(|value| value.into_owned())
                    .map_err(|_| invalid("credentials are not valid UTF-8"))
            };
            let user = match url.username() {
                "" => self.options.user.clone().unwrap_or_else(current_user),
                user => decode(user)?,
            };
            let password = match url.password() {
                Some(password) => Some(decode(password)?),
                None => self.options.password.clone(),
            };
            let path = match url.path() {
                "" => PathBuf::from("/"),
                path => PathBuf::from(path),
            };
            Ok(Location {
                host,
                port: url.port().unwrap_or(self.options.port),
                user,
                password,
                path,
            })
        }

        /// Runs `action` with an SFTP channel and the validated directory path
        async fn connect_dir<T, F>(&self, dir_url: &str, action: F) -> Result<T>
        where
            T: Send + 'static,
            F: FnOnce(&ssh2::Sftp, &Path) -> Result<T> + Send + 'static,
        {
            let location = self.location(dir_url)?;
            let timeout = self.options.timeout;
            let dir_url = dir_url.to_string();
            tokio::task::spawn_blocking(move || {
                let session = connect(&location, timeout)?;
                let result = session
                    .sftp()
                    .transfer_context(|| format!("cannot open SFTP channel to {}", location.host))
                    .and_then(|sftp| {
                        let stat = sftp.lstat(&location.path).transfer_context(|| {
                            format!("Directory at URL '{dir_url}' does not exist or not accessible")
                        })?;
                        if !stat.is_dir() {
                            return Err(Error::transfer(anyhow::anyhow!(
                                "Path at URL '{dir_url}' is not a directory."
                            ))
                            .with_retryable(false));
                        }
                        action(&sftp, &location.path)
                    });
                if let Err(error) = session.disconnect(None, "", None) {
                    tracing::debug!("SFTP disconnect from {} failed: {}", location.host, error);
                }
                result
            })
            .await
            .map_err(|error| Error::new(ErrorKind::Interrupted, error))?
        }
    }

    #[async_trait]
    impl FileTransfer for SftpFileTransfer {
        fn name(&self) -> &str {
            NAME
        }

        fn kind(&self) -> TransferKind {
            TransferKind::Sftp
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
            tracing::info!("Downloading file from URL '{}'", url);
            self.connect_dir(dir_url, move |sftp, dir| {
                let context = || format!("Cannot download file from URL '{url}'");
                let path = dir.join(&file_name);
                let stat = sftp.stat(&path).transfer_context(context)?;
                let input = sftp.open(&path).transfer_context(context)?;
                downloader
                    .size(stat.size)
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
            tracing::info!("Uploading file to URL '{}'", url);
            self.connect_dir(dir_url, move |sftp, dir| {
                let context =
                    || format!("Cannot upload file '{}' to URL '{}'", source.display(), url);
                let path = dir.join(&file_name);
                let output = sftp.create(&path).transfer_context(context)?;
                uploader
                    .upload_blocking(&source, output, || {
                        if let Err(error) = sftp.unlink(&path) {
                            tracing::debug!("cannot remove partial upload {:?}: {}", &path, error);
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
            self.connect_dir(dir_url, move |sftp, dir| {
                sftp.unlink(&dir.join(&file_name))
                    .transfer_context(|| format!("Cannot delete file at URL '{url}'"))
            })
            .await
        }

        #[instrument(skip(self))]
        async fn truncate(&self, dir_url: &str) -> Result<()> {
            let url = dir_url.to_string();
            tracing::info!("Truncating files at URL '{}'", url);
            self.connect_dir(dir_url, move |sftp, dir| {
                let context = || format!("Cannot truncate directory at URL '{url}'");
                for (name, _) in regular_files(sftp, dir).transfer_context(context)? {
                    sftp.unlink(&dir.join(&name)).transfer_context(context)?;
                }
                Ok(())
            })
            .await
        }

        #[instrument(skip(self))]
        async fn list(&self, dir_url: &str) -> Result<Vec<FileEntry>> {
            let url = dir_url.to_string();
            tracing::info!("Listing files at URL '{}'", url);
            self.connect_dir(dir_url, move |sftp, dir| {
                let files = regular_files(sftp, dir).transfer_context(|| {
                    format!("Cannot list files in directory at URL '{url}'")
                })?;
                let mut entries: Vec<FileEntry> = files
                    .into_iter()
                    .map(|(name, stat)| {
                        FileEntry::new(name, stat.size.unwrap_or_default(), modified(&stat))
                    })
                    .collect();
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(entries)
            })
            .await
        }

        #[instrument(skip(self))]
        async fn stat(&self, dir_url: &str, file_name: &str) -> Result<Option<FileEntry>> {
            let url = join_url(dir_url, file_name);
            let file_name = file_name.to_string();
            self.connect_dir(dir_url, move |sftp, dir| {
                tracing::info!("Checking file status at URL '{}'", url);
                match sftp.stat(&dir.join(&file_name)) {
                    Ok(stat) if stat.is_file() => Ok(Some(FileEntry::new(
                        file_name,
                        stat.size.unwrap_or_default(),
                        modified(&stat),
                    ))),
                    Ok(_) => Ok(None),
                    Err(error) if is_not_found(&error) => Ok(None),
                    Err(error) => Err(error)
                        .transfer_context(|| format!("Cannot check file status at URL '{url}'")),
                }
            })
            .await
        }
    }

}
