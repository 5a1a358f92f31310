//! libgit2-backed [`Repository`] over a directory on disk.
//!
//! Compiled with the `libgit2` feature. git2 calls are blocking and run
//! directly on the calling task.

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_types::Author;
use git2::{build::CheckoutBuilder, build::RepoBuilder, ErrorClass, ErrorCode};
use tracing::{debug, info};

use crate::error::{GitError, GitResult};
use crate::repository::{normalize_path, CommitInfo, NetworkOptions, Repository};

const REMOTE: &str = "origin";

impl From<git2::Error> for GitError {
    fn from(e: git2::Error) -> Self {
        let message = e.message().to_string();
        if e.code() == ErrorCode::Auth {
            return Self::Auth(message);
        }
        if e.code() == ErrorCode::NotFastForward
            || message.contains("non-fast-forward")
            || message.contains("fetch first")
        {
            return Self::NonFastForward(message);
        }
        if e.code() == ErrorCode::NotFound {
            return Self::NotFound(message);
        }
        match e.class() {
            ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh | ErrorClass::Ssl => {
                Self::Network(message)
            }
            ErrorClass::Os | ErrorClass::Filesystem => Self::Filesystem {
                path: String::new(),
                reason: message,
            },
            _ => Self::Other(message),
        }
    }
}

/// Remote callbacks wired to folio's credential and progress hooks.
fn callbacks<'a>(net: NetworkOptions<'a>, attempts: &'a Cell<u32>) -> git2::RemoteCallbacks<'a> {
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(move |url, _username, allowed| {
        if !allowed.is_user_pass_plaintext() {
            return git2::Cred::default();
        }
        let attempt = attempts.get() + 1;
        attempts.set(attempt);
        match net.auth.credentials(url, attempt) {
            Some(creds) => git2::Cred::userpass_plaintext(&creds.username, &creds.password),
            None => Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Http,
                "credentials rejected",
            )),
        }
    });
    callbacks.transfer_progress(move |stats| {
        net.report(stats.received_objects() as u64, stats.total_objects() as u64);
        true
    });
    callbacks.push_transfer_progress(move |current, total, _bytes| {
        net.report(current as u64, total as u64);
    });
    callbacks
}

fn proxy_options(net: NetworkOptions<'_>) -> git2::ProxyOptions<'_> {
    let mut proxy = git2::ProxyOptions::new();
    if let Some(url) = net.proxy_url {
        proxy.url(url);
    }
    proxy
}

struct Checkout {
    repo: git2::Repository,
    branch: String,
}

/// A working tree in a local directory with an `origin` remote.
pub struct Git2Repository {
    workdir: PathBuf,
    checkout: Mutex<Option<Checkout>>,
}

impl Git2Repository {
    /// Open `workdir`, attaching to an existing checkout if there is one.
    pub fn open(workdir: impl Into<PathBuf>) -> GitResult<Self> {
        let workdir = workdir.into();
        let checkout = if workdir.join(".git").exists() {
            let repo = git2::Repository::open(&workdir)?;
            let branch = repo
                .head()?
                .shorthand()
                .map(str::to_string)
                .ok_or_else(|| GitError::Other("detached HEAD".into()))?;
            Some(Checkout { repo, branch })
        } else {
            None
        };
        Ok(Self {
            workdir,
            checkout: Mutex::new(checkout),
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn path(&self, path: &str) -> PathBuf {
        self.workdir.join(normalize_path(path))
    }

    fn with_checkout<T>(&self, f: impl FnOnce(&Checkout) -> GitResult<T>) -> GitResult<T> {
        let guard = self.checkout.lock().expect("lock poisoned");
        let checkout = guard.as_ref().ok_or(GitError::NotInitialized)?;
        f(checkout)
    }

    fn fetch_options<'a>(net: NetworkOptions<'a>, attempts: &'a Cell<u32>) -> git2::FetchOptions<'a> {
        let mut fetch = git2::FetchOptions::new();
        fetch.remote_callbacks(callbacks(net, attempts));
        fetch.proxy_options(proxy_options(net));
        fetch
    }
}

#[async_trait]
impl Repository for Git2Repository {
    async fn clone_repo(&self, url: &str, branch: &str, net: NetworkOptions<'_>) -> GitResult<()> {
        let mut guard = self.checkout.lock().expect("lock poisoned");
        *guard = None;
        if self.workdir.exists() {
            fs::remove_dir_all(&self.workdir)
                .map_err(|e| GitError::filesystem(self.workdir.display().to_string(), e))?;
        }
        fs::create_dir_all(&self.workdir)
            .map_err(|e| GitError::filesystem(self.workdir.display().to_string(), e))?;

        let attempts = Cell::new(0);
        let mut fetch = Self::fetch_options(net, &attempts);
        // The local transport has no shallow support.
        if !url.starts_with("file://") {
            fetch.depth(1);
        }
        let repo = RepoBuilder::new()
            .branch(branch)
            .fetch_options(fetch)
            .clone(url, &self.workdir)?;
        info!(url, branch, workdir = %self.workdir.display(), "cloned");
        *guard = Some(Checkout {
            repo,
            branch: branch.to_string(),
        });
        Ok(())
    }

    async fn pull(&self, net: NetworkOptions<'_>) -> GitResult<()> {
        self.with_checkout(|Checkout { repo, branch }| {
            let attempts = Cell::new(0);
            let mut fetch = Self::fetch_options(net, &attempts);
            repo.find_remote(REMOTE)?
                .fetch(&[branch.as_str()], Some(&mut fetch), None)?;

            let fetch_head = repo.find_reference("FETCH_HEAD")?;
            let incoming = repo.reference_to_annotated_commit(&fetch_head)?;
            let (analysis, _) = repo.merge_analysis(&[&incoming])?;
            if analysis.is_up_to_date() {
                return Ok(());
            }
            if !analysis.is_fast_forward() {
                return Err(GitError::NonFastForward(format!(
                    "{branch} has diverged from {REMOTE}/{branch}"
                )));
            }

            let refname = format!("refs/heads/{branch}");
            repo.find_reference(&refname)?
                .set_target(incoming.id(), "folio: fast-forward")?;
            repo.set_head(&refname)?;
            repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
            debug!(head = %incoming.id(), "fast-forwarded");
            Ok(())
        })
    }

    async fn push(&self, net: NetworkOptions<'_>) -> GitResult<()> {
        self.with_checkout(|Checkout { repo, branch }| {
            let attempts = Cell::new(0);
            let rejection: RefCell<Option<String>> = RefCell::new(None);
            {
                let mut cbs = callbacks(net, &attempts);
                cbs.push_update_reference(|_refname, status| {
                    if let Some(msg) = status {
                        *rejection.borrow_mut() = Some(msg.to_string());
                    }
                    Ok(())
                });
                let mut options = git2::PushOptions::new();
                options.remote_callbacks(cbs);
                options.proxy_options(proxy_options(net));
                let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
                repo.find_remote(REMOTE)?
                    .push(&[refspec.as_str()], Some(&mut options))?;
            }
            match rejection.into_inner() {
                Some(msg) if msg.contains("non-fast-forward") || msg.contains("fetch first") => {
                    Err(GitError::NonFastForward(msg))
                }
                Some(msg) => Err(GitError::Other(format!("push rejected: {msg}"))),
                None => Ok(()),
            }
        })
    }

    async fn commit(&self, author: &Author, message: &str) -> GitResult<String> {
        self.with_checkout(|Checkout { repo, .. }| {
            let mut index = repo.index()?;
            let tree = repo.find_tree(index.write_tree()?)?;
            let signature = git2::Signature::now(&author.name, &author.email)?;
            let parent = match repo.head() {
                Ok(head) => Some(head.peel_to_commit()?),
                Err(e) if e.code() == ErrorCode::UnbornBranch => None,
                Err(e) => return Err(e.into()),
            };
            let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
            let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
            Ok(oid.to_string())
        })
    }

    async fn add(&self, path: &str) -> GitResult<()> {
        self.with_checkout(|Checkout { repo, .. }| {
            let mut index = repo.index()?;
            let relative = Path::new(normalize_path(path));
            if self.workdir.join(relative).exists() {
                index.add_path(relative)?;
            } else {
                index.remove_path(relative)?;
            }
            index.write()?;
            Ok(())
        })
    }

    async fn remove(&self, path: &str) -> GitResult<()> {
        self.with_checkout(|Checkout { repo, .. }| {
            let full = self.path(path);
            match fs::remove_file(&full) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(GitError::filesystem(path, e)),
            }
            let mut index = repo.index()?;
            index.remove_path(Path::new(normalize_path(path)))?;
            index.write()?;
            Ok(())
        })
    }

    async fn read_file(&self, path: &str) -> GitResult<String> {
        fs::read_to_string(self.path(path)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GitError::NotFound(path.to_string()),
            _ => GitError::filesystem(path, e),
        })
    }

    async fn write_file(&self, path: &str, contents: &str) -> GitResult<()> {
        let full = self.path(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| GitError::filesystem(path, e))?;
        }
        fs::write(&full, contents).map_err(|e| GitError::filesystem(path, e))
    }

    async fn exists(&self, path: &str) -> GitResult<bool> {
        Ok(self.path(path).exists())
    }

    async fn list_dir(&self, path: &str) -> GitResult<Vec<String>> {
        let entries = fs::read_dir(self.path(path)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GitError::NotFound(path.to_string()),
            _ => GitError::filesystem(path, e),
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GitError::filesystem(path, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != ".git" {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn commit_info(&self, shas: &[String]) -> GitResult<Vec<CommitInfo>> {
        self.with_checkout(|Checkout { repo, .. }| {
            let mut found = Vec::new();
            for sha in shas {
                let Ok(oid) = git2::Oid::from_str(sha) else {
                    continue;
                };
                let Ok(commit) = repo.find_commit(oid) else {
                    continue;
                };
                let signature = commit.author();
                found.push(CommitInfo {
                    sha: sha.clone(),
                    message: commit.message().unwrap_or_default().to_string(),
                    author: Author::new(
                        signature.name().unwrap_or_default(),
                        signature.email().unwrap_or_default(),
                    ),
                    timestamp: DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0)
                        .unwrap_or_default(),
                });
            }
            Ok(found)
        })
    }

    async fn unpushed(&self) -> GitResult<Option<String>> {
        self.with_checkout(|Checkout { repo, branch }| {
            let local = match repo.head() {
                Ok(head) => head.peel_to_commit()?.id(),
                Err(e) if e.code() == ErrorCode::UnbornBranch => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let tracking = format!("refs/remotes/{REMOTE}/{branch}");
            let upstream = match repo.refname_to_id(&tracking) {
                Ok(oid) => oid,
                Err(e) if e.code() == ErrorCode::NotFound => return Ok(Some(local.to_string())),
                Err(e) => return Err(e.into()),
            };
            if local != upstream && repo.graph_descendant_of(local, upstream)? {
                Ok(Some(local.to_string()))
            } else {
                Ok(None)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Anonymous;

    fn author() -> Author {
        Author::new("Ada", "ada@example.com")
    }

    /// A bare origin with one commit on `main`, plus its file URL.
    fn origin(dir: &Path) -> String {
        let seed_dir = dir.join("seed");
        let seed = git2::Repository::init(&seed_dir).unwrap();
        fs::create_dir_all(seed_dir.join("objects/post")).unwrap();
        fs::write(seed_dir.join("objects/post/hello.toml"), "title = \"Hello\"\n").unwrap();
        let mut index = seed.index().unwrap();
        index.add_path(Path::new("objects/post/hello.toml")).unwrap();
        index.write().unwrap();
        let tree = seed.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = git2::Signature::now("seed", "seed@example.com").unwrap();
        seed.commit(Some("refs/heads/main"), &sig, &sig, "seed", &tree, &[])
            .unwrap();
        seed.set_head("refs/heads/main").unwrap();

        let bare_dir = dir.join("origin.git");
        let bare = git2::Repository::init_bare(&bare_dir).unwrap();
        let mut remote = seed.remote("origin", bare_dir.to_str().unwrap()).unwrap();
        remote.push(&["refs/heads/main:refs/heads/main"], None).unwrap();
        drop(bare);
        format!("file://{}", bare_dir.display())
    }

    #[tokio::test]
    async fn clone_edit_commit() {
        let dir = tempfile::tempdir().unwrap();
        let url = origin(dir.path());
        let repo = Git2Repository::open(dir.path().join("work")).unwrap();
        repo.clone_repo(&url, "main", NetworkOptions::new(&Anonymous))
            .await
            .unwrap();
        assert_eq!(
            repo.read_file("objects/post/hello.toml").await.unwrap(),
            "title = \"Hello\"\n"
        );

        repo.write_file("objects/post/new.toml", "title = \"New\"\n")
            .await
            .unwrap();
        repo.add("objects/post/new.toml").await.unwrap();
        assert_eq!(repo.unpushed().await.unwrap(), None);
        let sha = repo.commit(&author(), "add post").await.unwrap();
        assert_eq!(repo.unpushed().await.unwrap(), Some(sha.clone()));
        repo.pull(NetworkOptions::new(&Anonymous)).await.unwrap();

        let info = repo.commit_info(&[sha.clone()]).await.unwrap();
        assert_eq!(info[0].message, "add post");
        assert_eq!(repo.list_dir("objects/post").await.unwrap(), vec!["hello.toml", "new.toml"]);
    }

    #[tokio::test]
    async fn pull_before_clone_fails() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Git2Repository::open(dir.path().join("none")).unwrap();
        let err = repo.pull(NetworkOptions::new(&Anonymous)).await.unwrap_err();
        assert_eq!(err, GitError::NotInitialized);
    }
}
