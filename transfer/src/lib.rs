//! Moving files between the local machine and remote or virtual locations
//!
//! A [`FileTransfer`] handler implements the operations for one family of URLs. The
//! [`manager::FileTransferManager`] keeps all handlers in a fixed priority order and picks the
//! first enabled one whose protocol patterns match a URL.
//!
//! | handler                     | patterns                       | parallelable |
//! |-----------------------------|--------------------------------|--------------|
//! | [`custom::CustomFileTransfer`] | `<name>://*` (configurable) | configurable |
//! | [`http::HttpFileTransfer`]  | `http://*`, `https://*`        | yes          |
//! | [`sftp`] (feature `sftp`)   | `sftp://*`                     | yes          |
//! | [`smb`] (feature `smb`)     | `smb://*`                      | yes          |
//! | [`resolve::ResolveFileTransfer`] | `resolve://*`, `group:name:version` | no  |
//! | [`url::UrlFileTransfer`]    | `*://*`                        | yes          |
//! | [`path::PathFileTransfer`]  | anything                       | yes          |
//!
//! Handlers behind a disabled cargo feature are not registered; their URLs then fall through to
//! the URL handler, which rejects unknown schemes.
//!
//! Every operation works on a directory URL plus a file name; see [`common::url::split_url`].
//! Operations a handler does not implement fail with
//! [`common::ErrorKind::UnsupportedOperation`].

use async_trait::async_trait;
use common::patterns::Patterns;
use common::{Error, Result};
use std::path::Path;
use std::time::SystemTime;

pub mod custom;
pub mod downloader;
pub mod http;
pub mod manager;
pub mod path;
pub mod resolve;
pub mod sftp;
pub mod smb;
pub mod uploader;
pub mod url;

pub use downloader::FileDownloader;
pub use manager::{FileTransferManager, FileTransferManagerBuilder};
pub use uploader::FileUploader;

/// Regular file found by `list` or `stat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, size: u64, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            size,
            modified,
        }
    }
}

impl std::fmt::Display for FileEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {} | {}",
            self.name,
            bytesize::ByteSize(self.size),
            humantime::format_rfc3339_seconds(self.modified)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Path,
    Url,
    Http,
    Sftp,
    Smb,
    Resolve,
    Custom,
}

/// Capability contract of a protocol handler
///
/// Unimplemented operations default to an unsupported-operation error naming the handler.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Unique handler id
    fn name(&self) -> &str;

    fn kind(&self) -> TransferKind;

    fn protocols(&self) -> &Patterns;

    fn enabled(&self) -> bool {
        true
    }

    /// Whether the handler may be used from several tasks at once
    fn parallelable(&self) -> bool {
        true
    }

    fn handles(&self, url: &str) -> bool {
        !url.trim().is_empty() && self.protocols().is_match(url)
    }

    async fn download_from(&self, dir_url: &str, file_name: &str, target: &Path) -> Result<()> {
        let _ = (dir_url, file_name, target);
        Err(Error::unsupported(self.name(), "download"))
    }

    async fn upload_to(&self, dir_url: &str, file_name: &str, source: &Path) -> Result<()> {
        let _ = (dir_url, file_name, source);
        Err(Error::unsupported(self.name(), "upload"))
    }

    async fn delete_from(&self, dir_url: &str, file_name: &str) -> Result<()> {
        let _ = (dir_url, file_name);
        Err(Error::unsupported(self.name(), "delete"))
    }

    /// Deletes every regular file in the directory
    async fn truncate(&self, dir_url: &str) -> Result<()> {
        let _ = dir_url;
        Err(Error::unsupported(self.name(), "truncate"))
    }

    async fn list(&self, dir_url: &str) -> Result<Vec<FileEntry>> {
        let _ = dir_url;
        Err(Error::unsupported(self.name(), "list"))
    }

    /// `None` when there is no regular file at the location
    async fn stat(&self, dir_url: &str, file_name: &str) -> Result<Option<FileEntry>> {
        let _ = (dir_url, file_name);
        Err(Error::unsupported(self.name(), "stat"))
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
