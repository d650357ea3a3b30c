use common::progress::{Reporter, TransferTracker};
use std::io::{Read, Write};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Streams a local file to a remote writer in fixed-size chunks
///
/// On failure the caller supplied cleanup runs, e.g. to remove the partial remote file.
#[derive(Debug, Clone)]
pub struct FileUploader {
    reporter: Reporter,
    chunk_size: usize,
}

impl FileUploader {
    pub fn new(context: &common::Context) -> Self {
        Self {
            reporter: context.reporter.clone(),
            chunk_size: context.upload_chunk_size,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub async fn upload<W, C>(&self, source: &Path, output: W, cleanup: C) -> std::io::Result<u64>
    where
        W: AsyncWrite,
        C: FnOnce(),
    {
        tokio::pin!(output);
        let result = async {
            let mut input = tokio::fs::File::open(source).await?;
            let size = input.metadata().await?.len();
            let mut tracker =
                self.reporter
                    .transfer("Uploading", &crate::file_name_of(source), Some(size));
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
            output.shutdown().await?;
            Ok::<_, std::io::Error>(tracker)
        }
        .await;
        finish(source, result, cleanup)
    }

    /// Variant for synchronous protocol clients; call from a blocking thread
    pub fn upload_blocking<W, C>(
        &self,
        source: &Path,
        mut output: W,
        cleanup: C,
    ) -> std::io::Result<u64>
    where
        W: Write,
        C: FnOnce(),
    {
        let result = self.read_blocking(source, &mut output);
        drop(output);
        finish(source, result, cleanup)
    }

    fn read_blocking<W: Write>(
        &self,
        source: &Path,
        output: &mut W,
    ) -> std::io::Result<TransferTracker> {
        let mut input = std::fs::File::open(source)?;
        let size = input.metadata()?.len();
        let mut tracker = self
            .reporter
            .transfer("Uploading", &crate::file_name_of(source), Some(size));
        let mut buffer = vec![0u8; self.chunk_size];
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
        output.flush()?;
        Ok(tracker)
    }
}

fn finish<C: FnOnce()>(
    source: &Path,
    result: std::io::Result<TransferTracker>,
    cleanup: C,
) -> std::io::Result<u64> {
    match result {
        Ok(tracker) => {
            let processed = tracker.processed();
            tracker.finish();
            Ok(processed)
        }
        Err(error) => {
            tracing::debug!("upload of {:?} failed, cleaning up: {}", source, &error);
            cleanup();
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Accepts `limit` bytes and then fails
    struct Full {
        limit: usize,
        received: Vec<u8>,
    }

    impl Write for Full {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.received.len() >= self.limit {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::StorageFull,
                    "no space left on device",
                ));
            }
            let len = buf.len().min(self.limit - self.received.len());
            self.received.extend_from_slice(&buf[..len]);
            Ok(len)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn uploader() -> anyhow::Result<FileUploader> {
        let context = common::Context::builder().work_dir("/").build()?;
        Ok(FileUploader::new(&context).with_chunk_size(512))
    }

    #[tokio::test]
    async fn uploads_whole_file() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let source = tmp_dir.path().join("source.bin");
        let payload = common::testutils::payload(5000);
        tokio::fs::write(&source, &payload).await?;
        let mut received = vec![];
        let cleaned = AtomicBool::new(false);
        let written = uploader()?
            .upload(&source, &mut received, || cleaned.store(true, Ordering::SeqCst))
            .await?;
        assert_eq!(written, 5000);
        assert_eq!(received, payload);
        assert!(!cleaned.load(Ordering::SeqCst));
        Ok(())
    }

    #[test]
    fn failed_upload_runs_cleanup() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let source = tmp_dir.path().join("source.bin");
        std::fs::write(&source, common::testutils::payload(4000))?;
        let cleaned = AtomicBool::new(false);
        let error = uploader()?
            .upload_blocking(
                &source,
                Full {
                    limit: 1000,
                    received: vec![],
                },
                || cleaned.store(true, Ordering::SeqCst),
            )
            .unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::StorageFull);
        assert!(cleaned.load(Ordering::SeqCst));
        Ok(())
    }

    #[test]
    fn missing_source_runs_cleanup() -> anyhow::Result<()> {
        let cleaned = AtomicBool::new(false);
        let result = uploader()?.upload_blocking(
            Path::new("/nonexistent/source.bin"),
            std::io::sink(),
            || cleaned.store(true, Ordering::SeqCst),
        );
        assert!(result.is_err());
        assert!(cleaned.load(Ordering::SeqCst));
        Ok(())
    }
}
