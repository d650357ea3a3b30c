//! Grouped, content-addressed file resolution
//!
//! A [`Resolver`] collects files to be made available locally into named [`FileGroup`]s. Every
//! registered value becomes a [`FileResolution`] whose id is a SHA-256 hash of its key (absolute
//! path, URL or notation), so registering the same value twice within a group yields the same
//! resolution and the underlying transfer runs at most once.
//!
//! Groups are resolved with [`Resolver::resolve_groups`]: parallelable groups go through the
//! worker pool limited to `parallel_level`, while groups that need serialization (dependency
//! resolution, non-parallelable handlers) run one at a time alongside them.
//!
//! ```rust,no_run
//! # async fn example(manager: std::sync::Arc<transfer::FileTransferManager>) -> common::Result<()> {
//! use rxfer_tools_rxfer::resolver::{Resolver, ResolverOptions};
//!
//! let resolver = Resolver::new(manager, ResolverOptions::default())?;
//! resolver.in_group("tools").download("https://example.com/dist/tool-1.0.zip").await?;
//! resolver.in_group("libs").get("org.example:core:2.0").await?;
//! let files = resolver.files().await?;
//! # Ok(())
//! # }
//! ```

use common::notation::DependencyNotation;
use common::patterns::Patterns;
use common::progress::ProgressCounter;
use common::url::{is_url, join_url, name_from_url, split_url};
use common::{Error, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tracing::instrument;
use transfer::resolve::ResolveFileTransfer;
use transfer::{FileTransferManager, TransferKind};

pub const DEFAULT_GROUP: &str = "default";

pub const DEFAULT_DOWNLOAD_DIR: &str = "download";

pub const DEFAULT_PARALLEL_LEVEL: usize = 3;

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// relative paths are resolved against the context work dir
    pub download_dir: PathBuf,
    /// groups resolved at once, 1 or less resolves everything sequentially
    pub parallel_level: usize,
    /// files considered by the `use_local_*` lookups
    pub local_file_patterns: Vec<String>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            parallel_level: DEFAULT_PARALLEL_LEVEL,
            local_file_patterns: vec!["**/*.zip".to_string(), "**/*.jar".to_string()],
        }
    }
}

/// Value a file is resolved from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// local file used in place
    Path(PathBuf),
    /// existing local path, URL or dependency notation
    Text(String),
    /// always resolved through the dependency resolver, one at a time
    Dependency(DependencyNotation),
}

impl From<&str> for FileSource {
    fn from(value: &str) -> Self {
        FileSource::Text(value.to_string())
    }
}

impl From<String> for FileSource {
    fn from(value: String) -> Self {
        FileSource::Text(value)
    }
}

impl From<PathBuf> for FileSource {
    fn from(value: PathBuf) -> Self {
        FileSource::Path(value)
    }
}

impl From<&Path> for FileSource {
    fn from(value: &Path) -> Self {
        FileSource::Path(value.to_path_buf())
    }
}

impl From<DependencyNotation> for FileSource {
    fn from(value: DependencyNotation) -> Self {
        FileSource::Dependency(value)
    }
}

type ResolveFn = Arc<dyn Fn(PathBuf) -> BoxFuture<'static, Result<PathBuf>> + Send + Sync>;

/// One file of a group, computed lazily and at most once
pub struct FileResolution {
    id: String,
    key: String,
    group: String,
    dir: PathBuf,
    resolve: ResolveFn,
    file: tokio::sync::OnceCell<PathBuf>,
}

impl std::fmt::Debug for FileResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileResolution")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("group", &self.group)
            .field("dir", &self.dir)
            .field("file", &self.file.get())
            .finish_non_exhaustive()
    }
}

impl FileResolution {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Absolute path, URL or notation the id was computed from
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Private directory downloads of this resolution land in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolves the file on first use; concurrent callers wait for the same attempt
    ///
    /// A failed attempt is not cached, the next call tries again.
    pub async fn file(&self) -> Result<PathBuf> {
        self.file
            .get_or_try_init(|| (self.resolve)(self.dir.clone()))
            .await
            .cloned()
    }

    pub fn resolved(&self) -> Option<&Path> {
        self.file.get().map(PathBuf::as_path)
    }
}

/// Stable id of a resolution key
pub fn resolution_id(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    hex::encode(digest)
}

/// Named set of resolutions resolved together
#[derive(Debug, Clone)]
pub struct FileGroup {
    name: String,
    parallelable: bool,
    resolutions: Vec<Arc<FileResolution>>,
}

impl FileGroup {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parallelable: true,
            resolutions: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once any member needs serialized resolution
    pub fn parallelable(&self) -> bool {
        self.parallelable
    }

    /// In registration order
    pub fn resolutions(&self) -> &[Arc<FileResolution>] {
        &self.resolutions
    }

    pub fn dirs(&self) -> Vec<&Path> {
        self.resolutions.iter().map(|resolution| resolution.dir()).collect()
    }

    /// Files of every resolution, resolved one after another
    #[instrument(skip(self), fields(group = %self.name))]
    pub async fn resolve(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::with_capacity(self.resolutions.len());
        for resolution in &self.resolutions {
            files.push(resolution.file().await?);
        }
        Ok(files)
    }
}

/// Candidate returned to `use_local_by` selectors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub modified: SystemTime,
}

type SelectFn = Arc<dyn Fn(Vec<LocalFile>) -> Option<LocalFile> + Send + Sync>;

/// Files under `dir` whose path relative to `dir` matches `patterns`
async fn local_files(dir: &Path, patterns: &Patterns) -> std::io::Result<Vec<LocalFile>> {
    let mut found = vec![];
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                pending.push(path);
                continue;
            }
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            if metadata.is_file() && patterns.is_match_path(relative) {
                found.push(LocalFile {
                    modified: metadata.modified()?,
                    path,
                });
            }
        }
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}

pub struct Resolver {
    manager: Arc<FileTransferManager>,
    download_dir: PathBuf,
    parallel_level: usize,
    local_file_patterns: Patterns,
    groups: Mutex<Vec<FileGroup>>,
    progress: Arc<ProgressCounter>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("download_dir", &self.download_dir)
            .field("parallel_level", &self.parallel_level)
            .field("local_file_patterns", &self.local_file_patterns.originals())
            .finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(manager: Arc<FileTransferManager>, options: ResolverOptions) -> Result<Self> {
        let download_dir = manager.context().resolve_path(&options.download_dir);
        let local_file_patterns =
            Patterns::paths(&options.local_file_patterns).map_err(Error::configuration)?;
        Ok(Self {
            manager,
            download_dir,
            parallel_level: options.parallel_level,
            local_file_patterns,
            groups: Mutex::new(vec![FileGroup::new(DEFAULT_GROUP)]),
            progress: Arc::new(ProgressCounter::new()),
        })
    }

    pub fn manager(&self) -> &Arc<FileTransferManager> {
        &self.manager
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn parallel_level(&self) -> usize {
        self.parallel_level
    }

    /// Registration scope for group `name`, created on first use
    pub fn in_group(&self, name: &str) -> GroupScope<'_> {
        self.with_group(name, |_| ());
        GroupScope {
            resolver: self,
            group: name.to_string(),
        }
    }

    fn default_group(&self) -> GroupScope<'_> {
        GroupScope {
            resolver: self,
            group: DEFAULT_GROUP.to_string(),
        }
    }

    fn with_group<T>(&self, name: &str, action: impl FnOnce(&mut FileGroup) -> T) -> T {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        let index = match groups.iter().position(|group| group.name == name) {
            Some(index) => index,
            None => {
                groups.push(FileGroup::new(name));
                groups.len() - 1
            }
        };
        action(&mut groups[index])
    }

    /// Snapshot of the groups having at least one resolution, in creation order
    pub fn groups(&self) -> Vec<FileGroup> {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|group| !group.resolutions.is_empty())
            .cloned()
            .collect()
    }

    pub fn group(&self, name: &str) -> Result<FileGroup> {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|group| group.name == name)
            .cloned()
            .ok_or_else(|| {
                Error::configuration(anyhow::anyhow!("File group '{name}' is not defined."))
            })
    }

    pub async fn get(&self, source: impl Into<FileSource>) -> Result<Arc<FileResolution>> {
        self.default_group().get(source).await
    }

    pub async fn download(&self, url: &str) -> Result<Arc<FileResolution>> {
        self.default_group().download(url).await
    }

    pub async fn download_all<I, S>(&self, dir_url: &str, file_names: I) -> Result<Vec<Arc<FileResolution>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.default_group().download_all(dir_url, file_names).await
    }

    pub fn use_local(&self, path: impl AsRef<Path>) -> Arc<FileResolution> {
        self.default_group().use_local(path)
    }

    pub fn use_local_recent(&self, dir: impl AsRef<Path>) -> Arc<FileResolution> {
        self.default_group().use_local_recent(dir)
    }

    pub fn use_local_last_named(&self, dir: impl AsRef<Path>) -> Arc<FileResolution> {
        self.default_group().use_local_last_named(dir)
    }

    /// Resolves every non-empty group whose name matches the wildcard `pattern`
    #[instrument(skip(self))]
    pub async fn resolve_groups(&self, pattern: &str) -> Result<Vec<FileGroup>> {
        let patterns = Patterns::wildcard([pattern]).map_err(Error::configuration)?;
        let groups: Vec<FileGroup> = self
            .groups()
            .into_iter()
            .filter(|group| patterns.is_match(&group.name))
            .collect();
        tracing::info!("Resolving files of {} group(s)", groups.len());
        let pool = &self.manager.context().pool;
        if self.parallel_level <= 1 {
            pool.map_limited(1, groups.clone(), resolve_group(&self.progress))
                .await?;
        } else {
            let (parallel, sequential): (Vec<_>, Vec<_>) = groups
                .iter()
                .cloned()
                .partition(|group| group.parallelable);
            let parallel = pool.map_limited(
                self.parallel_level,
                parallel,
                resolve_group(&self.progress),
            );
            let sequential = pool.map_limited(1, sequential, resolve_group(&self.progress));
            let (parallel, sequential) = tokio::join!(parallel, sequential);
            parallel?;
            sequential?;
        }
        let status = self.progress.get();
        tracing::debug!(
            "groups resolved so far: {}/{}",
            status.finished,
            status.started
        );
        Ok(groups)
    }

    pub async fn group_files(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let groups = self.resolve_groups(pattern).await?;
        let mut files = vec![];
        for group in &groups {
            // already resolved, only collects the memoized paths
            files.extend(group.resolve().await?);
        }
        Ok(files)
    }

    /// Files of all groups
    pub async fn files(&self) -> Result<Vec<PathBuf>> {
        self.group_files("*").await
    }

    pub async fn resolve_all(&self) -> Result<Vec<FileGroup>> {
        self.resolve_groups("*").await
    }
}

fn resolve_group(
    progress: &Arc<ProgressCounter>,
) -> impl Fn(FileGroup) -> BoxFuture<'static, Result<Vec<PathBuf>>> + Send + Sync + 'static {
    let progress = progress.clone();
    move |group: FileGroup| {
        let progress = progress.clone();
        async move {
            let _guard = progress.guard();
            tracing::info!("Resolving group '{}'", group.name());
            let files = group.resolve().await?;
            tracing::info!(
                "Resolved group '{}' with {} file(s)",
                group.name(),
                files.len()
            );
            Ok(files)
        }
        .boxed()
    }
}

/// Registers resolutions into one group
#[derive(Debug)]
pub struct GroupScope<'a> {
    resolver: &'a Resolver,
    group: String,
}

impl GroupScope<'_> {
    pub fn name(&self) -> &str {
        &self.group
    }

    fn register(&self, key: String, parallelable: bool, resolve: ResolveFn) -> Arc<FileResolution> {
        let id = resolution_id(&key);
        self.resolver.with_group(&self.group, |group| {
            if !parallelable && group.parallelable {
                tracing::debug!("group '{}' becomes sequential because of '{}'", group.name, key);
                group.parallelable = false;
            }
            if let Some(existing) = group.resolutions.iter().find(|resolution| resolution.id == id) {
                return existing.clone();
            }
            let resolution = Arc::new(FileResolution {
                dir: self.resolver.download_dir.join(&id),
                id,
                key,
                group: group.name.clone(),
                resolve,
                file: tokio::sync::OnceCell::new(),
            });
            group.resolutions.push(resolution.clone());
            resolution
        })
    }

    /// Existing local file, URL or notation; see [`FileSource`]
    pub async fn get(&self, source: impl Into<FileSource>) -> Result<Arc<FileResolution>> {
        match source.into() {
            FileSource::Path(path) => Ok(self.use_local(path)),
            FileSource::Text(text) => {
                if !is_url(&text) {
                    let local = self.resolver.manager.context().resolve_path(&text);
                    if tokio::fs::try_exists(&local).await.unwrap_or(false) {
                        return Ok(self.use_local(local));
                    }
                }
                self.download(&text).await
            }
            FileSource::Dependency(notation) => Ok(self.dependency(notation)),
        }
    }

    /// URL or notation resolved by the handler the manager picks for it
    pub async fn download(&self, url: &str) -> Result<Arc<FileResolution>> {
        let handler = self.resolver.manager.handling(url)?;
        if handler.kind() == TransferKind::Resolve {
            return Ok(self.dependency(ResolveFileTransfer::notation(url)?));
        }
        let manager = self.resolver.manager.clone();
        let url = url.to_string();
        let key = url.clone();
        Ok(self.register(
            key,
            handler.parallelable(),
            Arc::new(move |dir: PathBuf| {
                let manager = manager.clone();
                let handler = handler.clone();
                let url = url.clone();
                async move {
                    let (dir_url, file_name) = split_url(&url);
                    let target = dir.join(name_from_url(&url));
                    manager
                        .download_using(handler.as_ref(), &dir_url, &file_name, &target)
                        .await?;
                    Ok(target)
                }
                .boxed()
            }),
        ))
    }

    /// Several files sharing one directory URL
    pub async fn download_all<I, S>(&self, dir_url: &str, file_names: I) -> Result<Vec<Arc<FileResolution>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolutions = vec![];
        for file_name in file_names {
            resolutions.push(self.download(&join_url(dir_url, file_name.as_ref())).await?);
        }
        Ok(resolutions)
    }

    fn dependency(&self, notation: DependencyNotation) -> Arc<FileResolution> {
        let dependency_resolver = self.resolver.manager.dependency_resolver().clone();
        let key = notation.to_string();
        self.register(
            key,
            false,
            Arc::new(move |_: PathBuf| {
                let dependency_resolver = dependency_resolver.clone();
                let notation = notation.clone();
                async move { dependency_resolver.resolve(&notation).await }.boxed()
            }),
        )
    }

    /// Local file used in place, without copying
    pub fn use_local(&self, path: impl AsRef<Path>) -> Arc<FileResolution> {
        let path = self.resolver.manager.context().resolve_path(path);
        let key = path.display().to_string();
        self.register(
            key,
            true,
            Arc::new(move |_: PathBuf| {
                let path = path.clone();
                async move {
                    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                        return Err(Error::resolution(anyhow::anyhow!(
                            "Local file {:?} does not exist!",
                            &path
                        )));
                    }
                    Ok(path)
                }
                .boxed()
            }),
        )
    }

    /// File picked by `selector` among the local files under `dir`
    ///
    /// `label` distinguishes selectors applied to the same directory.
    pub fn use_local_by<F>(&self, dir: impl AsRef<Path>, label: &str, selector: F) -> Arc<FileResolution>
    where
        F: Fn(Vec<LocalFile>) -> Option<LocalFile> + Send + Sync + 'static,
    {
        let dir = self.resolver.manager.context().resolve_path(dir);
        let patterns = self.resolver.local_file_patterns.clone();
        let key = format!(
            "{}|{}|{}",
            dir.display(),
            patterns.originals().join(","),
            label
        );
        let selector: SelectFn = Arc::new(selector);
        self.register(
            key,
            true,
            Arc::new(move |_: PathBuf| {
                let dir = dir.clone();
                let patterns = patterns.clone();
                let selector = selector.clone();
                async move {
                    let candidates = local_files(&dir, &patterns).await.map_err(|error| {
                        Error::resolution(anyhow::anyhow!(error).context(format!(
                            "Cannot search for local files under directory {:?}",
                            &dir
                        )))
                    })?;
                    selector(candidates).map(|file| file.path).ok_or_else(|| {
                        Error::resolution(anyhow::anyhow!(
                            "Cannot find any local file under directory {:?} matching file patterns {:?}!",
                            &dir,
                            patterns.originals()
                        ))
                    })
                }
                .boxed()
            }),
        )
    }

    /// Most recently modified local file under `dir`
    pub fn use_local_recent(&self, dir: impl AsRef<Path>) -> Arc<FileResolution> {
        self.use_local_by(dir, "recent", |files| {
            files.into_iter().max_by_key(|file| file.modified)
        })
    }

    /// Local file under `dir` with the highest name, e.g. the newest version
    pub fn use_local_last_named(&self, dir: impl AsRef<Path>) -> Arc<FileResolution> {
        self.use_local_by(dir, "last-named", |files| {
            files.into_iter().max_by(|a, b| a.path.file_name().cmp(&b.path.file_name()))
        })
    }
}
