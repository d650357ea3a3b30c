use common::progress::{Reporter, TransferTracker};
use std::io::{Read, Write};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Streams bytes into a local file in fixed-size chunks
///
/// On failure the partially written target is removed.
#[derive(Debug, Clone)]
pub struct FileDownloader {
    reporter: Reporter,
    chunk_size: usize,
    size: Option<u64>,
}

impl FileDownloader {
    pub fn new(context: &common::Context) -> Self {
        Self {
            reporter: context.reporter.clone(),
            chunk_size: context.download_chunk_size,
            size: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Total size used for percentage and time estimates
    pub fn size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    pub async fn download<R>(&self, input: R, target: &Path) -> std::io::Result<u64>
    where
        R: AsyncRead,
    {
        tokio::pin!(input);
        let mut tracker =
            self.reporter
                .transfer("Downloading", &crate::file_name_of(target), self.size);
        let result = async {
            let mut output = tokio::fs::File::create(target).await?;
            let mut buffer = vec![0u8; self.chunk_size];
            loop {
                let read = input.read(&mut buffer).await?;
                if read == 0 {
                    break;
                }
                output.write_all(&buffer[..read]).await?;
                tracker.add(read as u64);
            }
            output.flush().await?;
            Ok::<_, std::io::Error>(())
        }
        .await;
        match result {
            Ok(()) => {
                let processed = tracker.processed();
                tracker.finish();
                Ok(processed)
            }
            Err(error) => {
                tracing::debug!("download to {:?} failed, removing it: {}", target, &error);
                match tokio::fs::remove_file(target).await {
                    Err(remove_error) if remove_error.kind() != std::io::ErrorKind::NotFound => {
                        tracing::warn!("cannot remove {:?}: {}", target, remove_error);
                    }
                    _ => {}
                }
                Err(error)
            }
        }
    }

    /// Variant for synchronous protocol clients; call from a blocking thread
    pub fn download_blocking<R>(&self, mut input: R, target: &Path) -> std::io::Result<u64>
    where
        R: Read,
    {
        let mut tracker =
            self.reporter
                .transfer("Downloading", &crate::file_name_of(target), self.size);
        match write_blocking(&mut input, target, self.chunk_size, &mut tracker) {
            Ok(()) => {
                let processed = tracker.processed();
                tracker.finish();
                Ok(processed)
            }
            Err(error) => {
                tracing::debug!("download to {:?} failed, removing it: {}", target, &error);
                match std::fs::remove_file(target) {
                    Err(remove_error) if remove_error.kind() != std::io::ErrorKind::NotFound => {
                        tracing::warn!("cannot remove {:?}: {}", target, remove_error);
                    }
                    _ => {}
                }
                Err(error)
            }
        }
    }
}

fn write_blocking<R: Read>(
    input: &mut R,
    target: &Path,
    chunk_size: usize,
    tracker: &mut TransferTracker,
) -> std::io::Result<()> {
    let mut output = std::fs::File::create(target)?;
    let mut buffer = vec![0u8; chunk_size];
    loop {
        let read = match input.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        output.write_all(&buffer[..read])?;
        tracker.add(read as u64);
    }
    output.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Yields `limit` bytes and then fails
    struct Broken {
        limit: usize,
        sent: usize,
    }

    impl AsyncRead for Broken {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.sent >= self.limit {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )));
            }
            let len = buf.remaining().min(self.limit - self.sent);
            buf.put_slice(&vec![7u8; len]);
            self.sent += len;
            Poll::Ready(Ok(()))
        }
    }

    fn downloader() -> anyhow::Result<FileDownloader> {
        let context = common::Context::builder().work_dir("/").build()?;
        Ok(FileDownloader::new(&context).with_chunk_size(1024))
    }

    #[tokio::test]
    async fn writes_all_chunks() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let target = tmp_dir.path().join("payload.bin");
        let payload = common::testutils::payload(10_000);
        let written = downloader()?
            .size(Some(payload.len() as u64))
            .download(payload.as_slice(), &target)
            .await?;
        assert_eq!(written, 10_000);
        assert_eq!(tokio::fs::read(&target).await?, payload);
        Ok(())
    }

    #[tokio::test]
    async fn failure_removes_partial_target() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let target = tmp_dir.path().join("payload.bin");
        let error = downloader()?
            .download(Broken { limit: 4096, sent: 0 }, &target)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::ConnectionReset);
        assert!(!target.exists());
        Ok(())
    }

    #[test]
    fn blocking_variant_writes_file() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let target = tmp_dir.path().join("blocking.bin");
        let payload = common::testutils::payload(3000);
        let written = downloader()?.download_blocking(payload.as_slice(), &target)?;
        assert_eq!(written, 3000);
        assert_eq!(std::fs::read(&target)?, payload);
        Ok(())
    }
}
