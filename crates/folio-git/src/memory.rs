use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_types::Author;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tracing::debug;

use crate::auth::{AuthProvider, Credentials, MAX_AUTH_ATTEMPTS};
use crate::error::{GitError, GitResult};
use crate::repository::{normalize_path, CommitInfo, NetworkOptions, Repository};

type Tree = BTreeMap<String, String>;

static COMMIT_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Debug)]
struct CommitRecord {
    sha: String,
    parent: Option<String>,
    message: String,
    author: Author,
    timestamp: DateTime<Utc>,
    tree: Tree,
}

impl CommitRecord {
    fn new(parent: Option<String>, author: &Author, message: &str, tree: Tree) -> Self {
        let timestamp = Utc::now();
        let mut hasher = Sha256::new();
        hasher.update(parent.as_deref().unwrap_or_default());
        hasher.update([0]);
        hasher.update(message);
        hasher.update([0]);
        hasher.update(format!("{} <{}>", author.name, author.email));
        hasher.update([0]);
        hasher.update(timestamp.to_rfc3339());
        hasher.update(COMMIT_COUNTER.fetch_add(1, Ordering::Relaxed).to_be_bytes());
        for (path, contents) in &tree {
            hasher.update(path);
            hasher.update([0]);
            hasher.update(contents);
            hasher.update([0]);
        }
        let mut sha = hex::encode(hasher.finalize());
        sha.truncate(40);
        Self {
            sha,
            parent,
            message: message.to_string(),
            author: author.clone(),
            timestamp,
            tree,
        }
    }

    fn info(&self) -> CommitInfo {
        CommitInfo {
            sha: self.sha.clone(),
            message: self.message.clone(),
            author: self.author.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Walk `from`'s first-parent chain through `commits` looking for `target`.
/// Returns the commits visited before reaching it, newest first.
fn chain_to(
    commits: &HashMap<String, CommitRecord>,
    from: &str,
    target: Option<&str>,
) -> Option<Vec<CommitRecord>> {
    let mut chain = Vec::new();
    let mut cursor = Some(from.to_string());
    while let Some(sha) = cursor {
        if Some(sha.as_str()) == target {
            return Some(chain);
        }
        let record = commits.get(&sha)?;
        cursor = record.parent.clone();
        chain.push(record.clone());
    }
    target.is_none().then_some(chain)
}

/// Network operations a [`SimulatedRemote`] can be told to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Clone,
    Pull,
    Push,
}

struct RemoteState {
    url: String,
    branches: BTreeMap<String, String>,
    commits: HashMap<String, CommitRecord>,
    credentials: Option<Credentials>,
    failures: VecDeque<(RemoteOp, GitError)>,
    holds: HashMap<RemoteOp, Hold>,
    calls: HashMap<RemoteOp, usize>,
}

/// A pause point armed with [`SimulatedRemote::hold_next`].
#[derive(Clone, Default)]
pub struct Hold {
    reached: Arc<Notify>,
    released: Arc<Notify>,
}

impl Hold {
    /// Wait until the held operation has started.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the held operation continue.
    pub fn release(&self) {
        self.released.notify_one();
    }
}

/// An in-process stand-in for a hosted git remote.
///
/// Clones share state, so a test can keep a handle and commit "from another
/// client" while a [`MemoryRepository`] is mid-sync.
#[derive(Clone)]
pub struct SimulatedRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl SimulatedRemote {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RemoteState {
                url: url.into(),
                branches: BTreeMap::new(),
                commits: HashMap::new(),
                credentials: None,
                failures: VecDeque::new(),
                holds: HashMap::new(),
                calls: HashMap::new(),
            })),
        }
    }

    pub fn url(&self) -> String {
        self.state.lock().expect("lock poisoned").url.clone()
    }

    /// Reject network operations that do not present `credentials`.
    pub fn require_credentials(&self, credentials: Credentials) {
        self.state.lock().expect("lock poisoned").credentials = Some(credentials);
    }

    /// Fail the next `op` with `error`. Queued failures fire in order.
    pub fn fail_next(&self, op: RemoteOp, error: GitError) {
        self.state
            .lock()
            .expect("lock poisoned")
            .failures
            .push_back((op, error));
    }

    /// Pause the next `op` until the returned [`Hold`] is released.
    pub fn hold_next(&self, op: RemoteOp) -> Hold {
        let hold = Hold::default();
        self.state
            .lock()
            .expect("lock poisoned")
            .holds
            .insert(op, hold.clone());
        hold
    }

    async fn pause_if_held(&self, op: RemoteOp) {
        let hold = self.state.lock().expect("lock poisoned").holds.remove(&op);
        if let Some(hold) = hold {
            debug!(?op, "holding");
            hold.reached.notify_one();
            hold.released.notified().await;
        }
    }

    /// How many times `op` has been attempted against this remote.
    pub fn calls(&self, op: RemoteOp) -> usize {
        let state = self.state.lock().expect("lock poisoned");
        state.calls.get(&op).copied().unwrap_or(0)
    }

    /// Commit directly on `branch`, as another client pushing would.
    ///
    /// `changes` maps paths to new contents; `None` deletes the path.
    pub fn commit_files<'a>(
        &self,
        branch: &str,
        author: &Author,
        message: &str,
        changes: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    ) -> String {
        let mut state = self.state.lock().expect("lock poisoned");
        let parent = state.branches.get(branch).cloned();
        let mut tree = parent
            .as_ref()
            .and_then(|sha| state.commits.get(sha))
            .map(|c| c.tree.clone())
            .unwrap_or_default();
        for (path, contents) in changes {
            let path = normalize_path(path).to_string();
            match contents {
                Some(contents) => {
                    tree.insert(path, contents.to_string());
                }
                None => {
                    tree.remove(&path);
                }
            }
        }
        let record = CommitRecord::new(parent, author, message, tree);
        let sha = record.sha.clone();
        state.commits.insert(sha.clone(), record);
        state.branches.insert(branch.to_string(), sha.clone());
        sha
    }

    pub fn tip(&self, branch: &str) -> Option<String> {
        self.state
            .lock()
            .expect("lock poisoned")
            .branches
            .get(branch)
            .cloned()
    }

    /// Contents of `path` at the tip of `branch`.
    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        let state = self.state.lock().expect("lock poisoned");
        let tip = state.branches.get(branch)?;
        state.commits.get(tip)?.tree.get(normalize_path(path)).cloned()
    }

    /// Commits reachable from `branch`, newest first.
    pub fn log(&self, branch: &str) -> Vec<CommitInfo> {
        let state = self.state.lock().expect("lock poisoned");
        let Some(tip) = state.branches.get(branch) else {
            return Vec::new();
        };
        chain_to(&state.commits, tip, None)
            .unwrap_or_default()
            .iter()
            .map(CommitRecord::info)
            .collect()
    }

    /// Gatekeeping shared by every network operation.
    fn admit(&self, op: RemoteOp, url: &str, auth: &dyn AuthProvider) -> GitResult<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        *state.calls.entry(op).or_default() += 1;
        if url != state.url {
            return Err(GitError::NotFound(url.to_string()));
        }
        if let Some(pos) = state.failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, error)) = state.failures.remove(pos) {
                return Err(error);
            }
        }
        let Some(expected) = &state.credentials else {
            return Ok(());
        };
        for attempt in 1..=MAX_AUTH_ATTEMPTS {
            match auth.credentials(url, attempt) {
                Some(offered) if &offered == expected => return Ok(()),
                Some(_) => continue,
                None => break,
            }
        }
        Err(GitError::Auth(url.to_string()))
    }
}

struct LocalState {
    url: Option<String>,
    branch: String,
    head: Option<String>,
    commits: HashMap<String, CommitRecord>,
    worktree: Tree,
    index: Tree,
    failing_writes: HashSet<String>,
}

impl LocalState {
    fn url(&self) -> GitResult<String> {
        self.url.clone().ok_or(GitError::NotInitialized)
    }

    fn head_tree(&self) -> Tree {
        self.head
            .as_ref()
            .and_then(|sha| self.commits.get(sha))
            .map(|c| c.tree.clone())
            .unwrap_or_default()
    }
}

/// A [`Repository`] held entirely in memory, talking to a [`SimulatedRemote`].
pub struct MemoryRepository {
    remote: SimulatedRemote,
    state: Mutex<LocalState>,
}

impl MemoryRepository {
    pub fn new(remote: SimulatedRemote) -> Self {
        Self {
            remote,
            state: Mutex::new(LocalState {
                url: None,
                branch: String::new(),
                head: None,
                commits: HashMap::new(),
                worktree: Tree::new(),
                index: Tree::new(),
                failing_writes: HashSet::new(),
            }),
        }
    }

    pub fn remote(&self) -> &SimulatedRemote {
        &self.remote
    }

    pub fn head(&self) -> Option<String> {
        self.state.lock().expect("lock poisoned").head.clone()
    }

    /// Make every later `write_file` to `path` fail with a filesystem error.
    pub fn fail_writes_to(&self, path: &str) {
        self.state
            .lock()
            .expect("lock poisoned")
            .failing_writes
            .insert(normalize_path(path).to_string());
    }

    /// Returns `true` if the working tree differs from the last commit.
    pub fn is_dirty(&self) -> bool {
        let state = self.state.lock().expect("lock poisoned");
        state.worktree != state.head_tree()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn clone_repo(&self, url: &str, branch: &str, net: NetworkOptions<'_>) -> GitResult<()> {
        self.remote.pause_if_held(RemoteOp::Clone).await;
        self.remote.admit(RemoteOp::Clone, url, net.auth)?;
        let tip = {
            let remote = self.remote.state.lock().expect("lock poisoned");
            let sha = remote
                .branches
                .get(branch)
                .ok_or_else(|| GitError::NotFound(format!("branch {branch}")))?;
            remote
                .commits
                .get(sha)
                .cloned()
                .ok_or_else(|| GitError::NotFound(sha.clone()))?
        };

        let total = tip.tree.len() as u64;
        for loaded in 1..=total {
            net.report(loaded, total);
        }

        let mut state = self.state.lock().expect("lock poisoned");
        state.url = Some(url.to_string());
        state.branch = branch.to_string();
        state.worktree = tip.tree.clone();
        state.index = tip.tree.clone();
        state.head = Some(tip.sha.clone());
        state.commits = HashMap::from([(tip.sha.clone(), tip)]);
        debug!(url, branch, files = total, "cloned");
        Ok(())
    }

    async fn pull(&self, net: NetworkOptions<'_>) -> GitResult<()> {
        self.remote.pause_if_held(RemoteOp::Pull).await;
        let mut state = self.state.lock().expect("lock poisoned");
        let url = state.url()?;
        self.remote.admit(RemoteOp::Pull, &url, net.auth)?;

        let remote = self.remote.state.lock().expect("lock poisoned");
        let Some(tip) = remote.branches.get(&state.branch).cloned() else {
            return Ok(());
        };
        let head = state.head.clone();
        if head.as_deref() == Some(tip.as_str()) {
            return Ok(());
        }

        let Some(incoming) = chain_to(&remote.commits, &tip, head.as_deref()) else {
            let ahead = head
                .as_deref()
                .and_then(|h| chain_to(&state.commits, h, Some(&tip)))
                .is_some();
            if ahead {
                return Ok(());
            }
            return Err(GitError::NonFastForward(format!(
                "local {} and remote {tip} have diverged",
                head.unwrap_or_default()
            )));
        };
        drop(remote);

        let total = incoming.len() as u64;
        let before = state.head_tree();
        let after = incoming[0].tree.clone();
        for (loaded, record) in incoming.into_iter().enumerate() {
            state.commits.insert(record.sha.clone(), record);
            net.report(loaded as u64 + 1, total);
        }

        let touched: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
        for path in touched {
            if before.get(path) == after.get(path) {
                continue;
            }
            match after.get(path) {
                Some(contents) => {
                    state.worktree.insert(path.clone(), contents.clone());
                    state.index.insert(path.clone(), contents.clone());
                }
                None => {
                    state.worktree.remove(path);
                    state.index.remove(path);
                }
            }
        }
        state.head = Some(tip.clone());
        debug!(head = %tip, commits = total, "fast-forwarded");
        Ok(())
    }

    async fn push(&self, net: NetworkOptions<'_>) -> GitResult<()> {
        self.remote.pause_if_held(RemoteOp::Push).await;
        let state = self.state.lock().expect("lock poisoned");
        let url = state.url()?;
        self.remote.admit(RemoteOp::Push, &url, net.auth)?;
        let Some(head) = state.head.clone() else {
            return Ok(());
        };

        let mut remote = self.remote.state.lock().expect("lock poisoned");
        let tip = remote.branches.get(&state.branch).cloned();
        let outgoing = chain_to(&state.commits, &head, tip.as_deref()).ok_or_else(|| {
            GitError::NonFastForward(format!(
                "remote {} is not an ancestor of {head}",
                tip.unwrap_or_default()
            ))
        })?;

        let total = outgoing.len() as u64;
        for (loaded, record) in outgoing.into_iter().rev().enumerate() {
            remote.commits.insert(record.sha.clone(), record);
            net.report(loaded as u64 + 1, total);
        }
        remote.branches.insert(state.branch.clone(), head.clone());
        debug!(head = %head, commits = total, "pushed");
        Ok(())
    }

    async fn commit(&self, author: &Author, message: &str) -> GitResult<String> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.url()?;
        let record = CommitRecord::new(state.head.clone(), author, message, state.index.clone());
        let sha = record.sha.clone();
        state.commits.insert(sha.clone(), record);
        state.head = Some(sha.clone());
        Ok(sha)
    }

    async fn add(&self, path: &str) -> GitResult<()> {
        let path = normalize_path(path);
        let mut state = self.state.lock().expect("lock poisoned");
        match state.worktree.get(path).cloned() {
            Some(contents) => {
                state.index.insert(path.to_string(), contents);
                Ok(())
            }
            None if state.index.remove(path).is_some() => Ok(()),
            None => Err(GitError::NotFound(path.to_string())),
        }
    }

    async fn remove(&self, path: &str) -> GitResult<()> {
        let path = normalize_path(path);
        let mut state = self.state.lock().expect("lock poisoned");
        let in_tree = state.worktree.remove(path).is_some();
        let in_index = state.index.remove(path).is_some();
        if in_tree || in_index {
            Ok(())
        } else {
            Err(GitError::NotFound(path.to_string()))
        }
    }

    async fn read_file(&self, path: &str) -> GitResult<String> {
        let path = normalize_path(path);
        let state = self.state.lock().expect("lock poisoned");
        state
            .worktree
            .get(path)
            .cloned()
            .ok_or_else(|| GitError::NotFound(path.to_string()))
    }

    async fn write_file(&self, path: &str, contents: &str) -> GitResult<()> {
        let path = normalize_path(path);
        let mut state = self.state.lock().expect("lock poisoned");
        if state.failing_writes.contains(path) {
            return Err(GitError::filesystem(path, "write refused"));
        }
        state.worktree.insert(path.to_string(), contents.to_string());
        Ok(())
    }

    async fn exists(&self, path: &str) -> GitResult<bool> {
        let path = normalize_path(path);
        let state = self.state.lock().expect("lock poisoned");
        let prefix = format!("{path}/");
        Ok(state.worktree.contains_key(path)
            || state.worktree.keys().any(|k| k.starts_with(&prefix)))
    }

    async fn list_dir(&self, path: &str) -> GitResult<Vec<String>> {
        let path = normalize_path(path);
        let state = self.state.lock().expect("lock poisoned");
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let names: BTreeSet<String> = state
            .worktree
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .map(str::to_string)
            .collect();
        if names.is_empty() && !path.is_empty() {
            return Err(GitError::NotFound(path.to_string()));
        }
        Ok(names.into_iter().collect())
    }

    async fn commit_info(&self, shas: &[String]) -> GitResult<Vec<CommitInfo>> {
        let state = self.state.lock().expect("lock poisoned");
        Ok(shas
            .iter()
            .filter_map(|sha| state.commits.get(sha))
            .map(CommitRecord::info)
            .collect())
    }

    async fn unpushed(&self) -> GitResult<Option<String>> {
        let state = self.state.lock().expect("lock poisoned");
        state.url()?;
        let Some(head) = state.head.clone() else {
            return Ok(None);
        };
        let remote = self.remote.state.lock().expect("lock poisoned");
        Ok((!remote.commits.contains_key(&head)).then_some(head))
    }
}
