use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_types::Author;
use serde::{Deserialize, Serialize};

use crate::auth::AuthProvider;
use crate::error::GitResult;

/// Progress of a network transfer, in objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub loaded: u64,
    pub total: u64,
}

impl Transfer {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.loaded as f64 / self.total as f64).min(1.0)
        }
    }
}

/// Receives transfer progress from clone, pull and push.
pub trait TransferObserver: Send + Sync {
    fn on_transfer(&self, transfer: Transfer);
}

impl<F> TransferObserver for F
where
    F: Fn(Transfer) + Send + Sync,
{
    fn on_transfer(&self, transfer: Transfer) {
        self(transfer)
    }
}

/// Per-call options for network primitives.
#[derive(Clone, Copy)]
pub struct NetworkOptions<'a> {
    pub auth: &'a dyn AuthProvider,
    pub observer: Option<&'a dyn TransferObserver>,
    pub proxy_url: Option<&'a str>,
}

impl<'a> NetworkOptions<'a> {
    pub fn new(auth: &'a dyn AuthProvider) -> Self {
        Self {
            auth,
            observer: None,
            proxy_url: None,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn TransferObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_proxy(mut self, proxy_url: Option<&'a str>) -> Self {
        self.proxy_url = proxy_url;
        self
    }

    pub fn report(&self, loaded: u64, total: u64) {
        if let Some(observer) = self.observer {
            observer.on_transfer(Transfer { loaded, total });
        }
    }
}

/// Summary of one commit, as returned by [`Repository::commit_info`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author: Author,
    pub timestamp: DateTime<Utc>,
}

/// A working tree backed by a git repository with one remote branch.
///
/// Paths are relative to the working-tree root and use `/` separators.
/// Implementations use interior mutability so a repository can be shared
/// behind an `Arc`.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Replace whatever is checked out with a shallow, single-branch clone
    /// of `branch` from `url`.
    async fn clone_repo(&self, url: &str, branch: &str, net: NetworkOptions<'_>) -> GitResult<()>;

    /// Fast-forward to the remote branch tip. Diverged history fails with
    /// [`GitError::NonFastForward`](crate::GitError::NonFastForward) and
    /// leaves the working tree untouched.
    async fn pull(&self, net: NetworkOptions<'_>) -> GitResult<()>;

    /// Push local commits to the remote branch.
    async fn push(&self, net: NetworkOptions<'_>) -> GitResult<()>;

    /// Commit the staged index. Returns the new commit sha.
    async fn commit(&self, author: &Author, message: &str) -> GitResult<String>;

    /// Stage the working-tree contents of `path`.
    async fn add(&self, path: &str) -> GitResult<()>;

    /// Delete `path` from the working tree and stage the removal.
    async fn remove(&self, path: &str) -> GitResult<()>;

    async fn read_file(&self, path: &str) -> GitResult<String>;

    /// Write `path`, creating parent directories as needed.
    async fn write_file(&self, path: &str, contents: &str) -> GitResult<()>;

    async fn exists(&self, path: &str) -> GitResult<bool>;

    /// Names of the immediate entries under directory `path`, sorted.
    async fn list_dir(&self, path: &str) -> GitResult<Vec<String>>;

    /// Look up commits by sha. Unknown shas are skipped.
    async fn commit_info(&self, shas: &[String]) -> GitResult<Vec<CommitInfo>>;

    /// The local head if the remote branch does not contain it yet.
    async fn unpushed(&self) -> GitResult<Option<String>>;
}

/// Strip leading and trailing separators so `"/objects/"` and `"objects"`
/// address the same directory.
pub fn normalize_path(path: &str) -> &str {
    path.trim_matches('/')
}
