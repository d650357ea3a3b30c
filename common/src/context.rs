use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::progress::{ProgressSettings, Reporter};

pub const DEFAULT_DOWNLOAD_CHUNK_SIZE: usize = 512 * 1024;
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 100 * 1024;

/// Everything scoped to one run: the worker pool, progress output and directories
///
/// Created once by the top-level orchestrator and handed to every component at construction.
#[derive(Debug)]
pub struct Context {
    pub pool: pool::WorkerPool,
    pub reporter: Reporter,
    /// base for relative paths
    pub work_dir: PathBuf,
    /// where `download(url)` places files
    pub temp_dir: PathBuf,
    pub download_chunk_size: usize,
    pub upload_chunk_size: usize,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    /// Shuts the worker pool down; pending pool work fails afterwards
    pub fn close(&self) {
        self.pool.shutdown();
    }
}

#[derive(Debug, Default)]
pub struct ContextBuilder {
    pool_size: usize,
    progress: Option<ProgressSettings>,
    work_dir: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    download_chunk_size: Option<usize>,
    upload_chunk_size: Option<usize>,
}

impl ContextBuilder {
    /// Worker pool size, 0 = number of CPU cores
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn progress(mut self, progress: Option<ProgressSettings>) -> Self {
        self.progress = progress;
        self
    }

    pub fn work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    pub fn temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    pub fn download_chunk_size(mut self, size: usize) -> Self {
        self.download_chunk_size = Some(size);
        self
    }

    pub fn upload_chunk_size(mut self, size: usize) -> Self {
        self.upload_chunk_size = Some(size);
        self
    }

    pub fn build(self) -> anyhow::Result<Arc<Context>> {
        let work_dir = match self.work_dir {
            Some(work_dir) => work_dir,
            None => std::env::current_dir()
                .map_err(|error| anyhow::anyhow!("cannot determine working directory: {error}"))?,
        };
        let temp_dir = match self.temp_dir {
            Some(temp_dir) if temp_dir.is_absolute() => temp_dir,
            Some(temp_dir) => work_dir.join(temp_dir),
            None => std::env::temp_dir().join("rxfer"),
        };
        let download_chunk_size = self
            .download_chunk_size
            .unwrap_or(DEFAULT_DOWNLOAD_CHUNK_SIZE);
        let upload_chunk_size = self.upload_chunk_size.unwrap_or(DEFAULT_UPLOAD_CHUNK_SIZE);
        if download_chunk_size == 0 || upload_chunk_size == 0 {
            return Err(anyhow::anyhow!("chunk size must be greater than 0"));
        }
        Ok(Arc::new(Context {
            pool: pool::WorkerPool::new(self.pool_size),
            reporter: Reporter::new(self.progress.as_ref()),
            work_dir,
            temp_dir,
            download_chunk_size,
            upload_chunk_size,
        }))
    }
}
