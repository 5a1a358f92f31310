use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use folio_git::{AuthProvider, CommitInfo, GitResult, NetworkOptions, Repository, Transfer, TransferObserver};
use folio_ledger::LedgerSnapshot;
use folio_store::{ObjectCodec, ObjectStore, ObjectsData, StoreLayout};
use folio_types::{Author, ObjectId};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncFailure, SyncResult};
use crate::progress::{Progress, ProgressObserver, SyncPhase};
use crate::replay::{self, WritePlan};

/// Outcome of a successful sync.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncReport {
    /// The new commit, or `None` when there was nothing to write.
    pub commit: Option<String>,
    pub written: usize,
    pub removed: usize,
    /// Ledger ids whose object now has a different id: every edited
    /// object and every `temp:` object that was written.
    pub renamed: BTreeMap<ObjectId, ObjectId>,
    /// The refreshed store contents.
    pub objects: ObjectsData,
}

/// Prior contents of each path a write plan touches. `None` means the path
/// did not exist.
type Backup = Vec<(String, Option<String>)>;

/// Runs clone, refresh and sync against one repository.
///
/// Owns the working tree handle and the object store. Operations take
/// `&mut self`, so one engine runs at most one of them at a time.
pub struct SyncEngine {
    repo: Arc<dyn Repository>,
    codec: Arc<dyn ObjectCodec>,
    config: EngineConfig,
    layout: StoreLayout,
    store: ObjectStore,
    unpushed: Option<String>,
}

impl SyncEngine {
    pub fn new(repo: Arc<dyn Repository>, codec: Arc<dyn ObjectCodec>, config: EngineConfig) -> Self {
        let layout = config.layout();
        Self {
            repo,
            codec,
            config,
            layout,
            store: ObjectStore::new(),
            unpushed: None,
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn objects(&self) -> ObjectsData {
        self.store.snapshot()
    }

    /// The local commit a failed push left behind, if any.
    pub fn unpushed(&self) -> Option<&str> {
        self.unpushed.as_deref()
    }

    fn network<'a>(
        &'a self,
        auth: &'a dyn AuthProvider,
        observer: &'a dyn TransferObserver,
    ) -> NetworkOptions<'a> {
        NetworkOptions::new(auth)
            .with_observer(observer)
            .with_proxy(self.config.proxy_url.as_deref())
    }

    async fn reload(&mut self) -> SyncResult<()> {
        self.store
            .refresh(self.repo.as_ref(), self.codec.as_ref(), &self.layout)
            .await
            .map_err(SyncError::from)
    }

    /// Replace the working tree with a fresh clone of `branch` and load it.
    pub async fn clone(
        &mut self,
        url: &str,
        branch: &str,
        auth: &dyn AuthProvider,
        progress: &dyn ProgressObserver,
    ) -> Result<ObjectsData, SyncFailure> {
        info!(url, branch, "cloning");
        progress.on_progress(Progress::at(SyncPhase::Cloning, 0.0));
        let on_transfer =
            |t: Transfer| progress.on_progress(Progress::at(SyncPhase::Cloning, t.fraction()));
        self.repo
            .clone_repo(url, branch, self.network(auth, &on_transfer))
            .await
            .map_err(|e| SyncError::from(e).during(SyncPhase::Cloning))?;
        self.unpushed = None;
        self.refresh(progress).await
    }

    /// Re-read every object from the working tree.
    pub async fn refresh(&mut self, progress: &dyn ProgressObserver) -> Result<ObjectsData, SyncFailure> {
        progress.on_progress(Progress::at(SyncPhase::Refreshing, 0.0));
        self.reload()
            .await
            .map_err(|e| e.during(SyncPhase::Refreshing))?;
        progress.on_progress(Progress::done(SyncPhase::Refreshing));
        Ok(self.store.snapshot())
    }

    /// Pull, replay `ledger` over the pulled objects, write, commit, push
    /// and refresh.
    ///
    /// Failures before the commit leave the working tree as the pull left
    /// it. A failed push keeps the commit, refreshes the store and reports
    /// the failure with `committed` set; [`retry_push`](Self::retry_push)
    /// or the next sync pushes it.
    pub async fn sync(
        &mut self,
        ledger: &LedgerSnapshot,
        author: &Author,
        auth: &dyn AuthProvider,
        progress: &dyn ProgressObserver,
    ) -> Result<SyncReport, SyncFailure> {
        author.validate().map_err(SyncError::validation)?;
        for change in &ledger.changes {
            change.validate().map_err(SyncError::validation)?;
        }
        for deletion in &ledger.deletions {
            deletion.validate().map_err(SyncError::validation)?;
        }
        info!(
            changes = ledger.changes.len(),
            deletions = ledger.deletions.len(),
            "sync started"
        );

        progress.on_progress(Progress::at(SyncPhase::Pulling, 0.0));
        let on_transfer =
            |t: Transfer| progress.on_progress(Progress::at(SyncPhase::Pulling, t.fraction()));
        self.repo
            .pull(self.network(auth, &on_transfer))
            .await
            .map_err(|e| SyncError::from(e).during(SyncPhase::Pulling))?;
        let earlier = self
            .pending_push()
            .await
            .map_err(|e| e.during(SyncPhase::Pulling))?;
        if let Some(sha) = earlier {
            self.push(auth, progress)
                .await
                .map_err(|e| e.during(SyncPhase::Pushing).after_commit())?;
            self.unpushed = None;
            info!(commit = %sha, "pushed earlier commit");
        }
        self.reload()
            .await
            .map_err(|e| e.during(SyncPhase::Pulling))?;

        if ledger.is_empty() {
            return Ok(self.finish(None, &WritePlan::default(), progress));
        }

        progress.on_progress(Progress::at(SyncPhase::ReplayingChanges, 0.0));
        let plan = replay::plan(&self.store, ledger, &self.layout, self.codec.as_ref())
            .map_err(|e| e.during(SyncPhase::ReplayingChanges))?;
        debug!(
            writes = plan.writes.len(),
            removals = plan.removals.len(),
            "replay planned"
        );
        if plan.is_empty() {
            return Ok(self.finish(None, &plan, progress));
        }

        progress.on_progress(Progress::at(SyncPhase::WritingFiles, 0.0));
        let backup = self
            .write(&plan, progress)
            .await
            .map_err(|e| e.during(SyncPhase::WritingFiles))?;

        progress.on_progress(Progress::at(SyncPhase::Committing, 0.0));
        let sha = match self.repo.commit(author, &self.config.commit_message).await {
            Ok(sha) => sha,
            Err(e) => {
                self.restore(&backup).await;
                return Err(SyncError::from(e).during(SyncPhase::Committing));
            }
        };
        info!(commit = %sha, "committed");

        progress.on_progress(Progress::at(SyncPhase::Pushing, 0.0));
        if let Err(e) = self.push(auth, progress).await {
            warn!(commit = %sha, error = %e, "push failed, commit kept locally");
            self.unpushed = Some(sha);
            if let Err(refresh) = self.reload().await {
                warn!(error = %refresh, "refresh after failed push failed");
            }
            return Err(e
                .during(SyncPhase::Pushing)
                .after_commit()
                .with_renamed(self.renamed(&plan)));
        }

        progress.on_progress(Progress::at(SyncPhase::Refreshing, 0.0));
        self.reload()
            .await
            .map_err(|e| e.during(SyncPhase::Refreshing).after_commit())?;
        Ok(self.finish(Some(sha), &plan, progress))
    }

    fn finish(&self, commit: Option<String>, plan: &WritePlan, progress: &dyn ProgressObserver) -> SyncReport {
        progress.on_progress(Progress::done(SyncPhase::Refreshing));
        info!(
            commit = commit.as_deref().unwrap_or("none"),
            written = plan.writes.len(),
            removed = plan.removals.len(),
            objects = self.store.len(),
            "sync complete"
        );
        SyncReport {
            commit,
            written: plan.writes.len(),
            removed: plan.removals.len(),
            renamed: self.renamed(plan),
            objects: self.store.snapshot(),
        }
    }

    /// Match each written object to what the refreshed store holds at its
    /// location.
    fn renamed(&self, plan: &WritePlan) -> BTreeMap<ObjectId, ObjectId> {
        let by_location: HashMap<&str, ObjectId> = self
            .store
            .iter()
            .filter_map(|o| Some((o.location.as_deref()?, o.id)))
            .collect();
        plan.targets
            .iter()
            .filter_map(|(old, location)| {
                let new = *by_location.get(location.as_str())?;
                (new != *old).then_some((*old, new))
            })
            .collect()
    }

    /// Push the commit a failed push left behind.
    pub async fn retry_push(
        &mut self,
        auth: &dyn AuthProvider,
        progress: &dyn ProgressObserver,
    ) -> Result<String, SyncFailure> {
        let sha = self.pending_push().await?.ok_or(SyncError::NothingToPush)?;
        progress.on_progress(Progress::at(SyncPhase::Pushing, 0.0));
        self.push(auth, progress)
            .await
            .map_err(|e| e.during(SyncPhase::Pushing).after_commit())?;
        self.unpushed = None;
        progress.on_progress(Progress::done(SyncPhase::Pushing));
        info!(commit = %sha, "push retried");
        Ok(sha)
    }

    /// The commit still waiting to be pushed. Falls back to asking the
    /// repository, so a commit left by an earlier process is found too.
    async fn pending_push(&self) -> SyncResult<Option<String>> {
        match &self.unpushed {
            Some(sha) => Ok(Some(sha.clone())),
            None => Ok(self.repo.unpushed().await?),
        }
    }

    /// Look up commits known to the local repository.
    pub async fn lookup_commits(&self, shas: &[String]) -> SyncResult<Vec<CommitInfo>> {
        Ok(self.repo.commit_info(shas).await?)
    }

    async fn push(&self, auth: &dyn AuthProvider, progress: &dyn ProgressObserver) -> SyncResult<()> {
        let on_transfer =
            |t: Transfer| progress.on_progress(Progress::at(SyncPhase::Pushing, t.fraction()));
        Ok(self.repo.push(self.network(auth, &on_transfer)).await?)
    }

    /// Apply `plan` to the working tree and stage it. Either every path is
    /// updated or the previous contents are put back.
    async fn write(&self, plan: &WritePlan, progress: &dyn ProgressObserver) -> SyncResult<Backup> {
        let mut backup = Backup::new();
        let mut seen = HashSet::new();
        for path in plan.paths() {
            if !seen.insert(path) {
                continue;
            }
            let prior = if self.repo.exists(path).await? {
                Some(self.repo.read_file(path).await?)
            } else {
                None
            };
            backup.push((path.to_string(), prior));
        }

        if let Err(e) = self.apply(plan, progress).await {
            warn!(error = %e, "write failed, restoring working tree");
            self.restore(&backup).await;
            return Err(e.into());
        }
        Ok(backup)
    }

    async fn apply(&self, plan: &WritePlan, progress: &dyn ProgressObserver) -> GitResult<()> {
        let total = plan.len() as f64;
        let mut done = 0.0;
        for path in &plan.removals {
            self.repo.remove(path).await?;
            done += 1.0;
            progress.on_progress(Progress::at(SyncPhase::WritingFiles, done / total));
        }
        for write in &plan.writes {
            self.repo.write_file(&write.location, &write.contents).await?;
            self.repo.add(&write.location).await?;
            done += 1.0;
            progress.on_progress(Progress::at(SyncPhase::WritingFiles, done / total));
        }
        Ok(())
    }

    async fn restore(&self, backup: &Backup) {
        for (path, prior) in backup {
            let current = self.repo.read_file(path).await.ok();
            if current == *prior {
                continue;
            }
            let result = match prior {
                Some(contents) => match self.repo.write_file(path, contents).await {
                    Ok(()) => self.repo.add(path).await,
                    Err(e) => Err(e),
                },
                None => self.repo.remove(path).await,
            };
            if let Err(e) = result {
                warn!(path = %path, error = %e, "cannot restore file");
            }
        }
        debug!(paths = backup.len(), "working tree restored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use folio_crypto::ContentHasher;
    use folio_git::{Anonymous, Credentials, GitError, MemoryRepository, RemoteOp, SimulatedRemote, TokenAuth};
    use folio_store::TomlCodec;
    use folio_types::{Change, ChangeKey, Deletion, FieldMap, FieldValue, ObjectId};

    use crate::progress::Silent;

    const URL: &str = "https://git.example.com/site.git";
    const TYPES: &str = "[post]\ntitle = \"string\"\n\n[[post.sections]]\nheading = \"string\"\n";

    fn author() -> Author {
        Author::new("Ada", "ada@example.com")
    }

    struct Fixture {
        remote: SimulatedRemote,
        repo: Arc<MemoryRepository>,
        engine: SyncEngine,
    }

    async fn fixture(files: &[(&str, &str)]) -> Fixture {
        let remote = SimulatedRemote::new(URL);
        let mut seed = vec![("objects.toml", Some(TYPES))];
        seed.extend(files.iter().map(|(p, c)| (*p, Some(*c))));
        remote.commit_files("main", &author(), "seed", seed);
        let repo = Arc::new(MemoryRepository::new(remote.clone()));
        let mut engine = SyncEngine::new(repo.clone(), Arc::new(TomlCodec), EngineConfig::default());
        engine.clone(URL, "main", &Anonymous, &Silent).await.unwrap();
        Fixture { remote, repo, engine }
    }

    fn ledger(changes: Vec<Change>, deletions: Vec<Deletion>) -> LedgerSnapshot {
        LedgerSnapshot { changes, deletions }
    }

    fn title(id: ObjectId, value: &str) -> Change {
        Change::new(ChangeKey::field(id, "title"), "post", value.into())
    }

    #[tokio::test]
    async fn new_object_gets_content_id_and_file() {
        let mut f = fixture(&[]).await;
        let temp = ObjectId::new_temp();
        let snapshot = ledger(
            vec![
                Change::new(ChangeKey::field(temp, "name"), "post", "hello".into()),
                title(temp, "Hello"),
            ],
            vec![],
        );
        let report = f
            .engine
            .sync(&snapshot, &author(), &Anonymous, &Silent)
            .await
            .unwrap();

        assert!(report.commit.is_some());
        let posts = &report.objects.objects["post"];
        assert_eq!(posts.len(), 1);
        let mut expected = FieldMap::new();
        expected.insert("title".into(), FieldValue::string("Hello"));
        assert_eq!(posts[0].id, ContentHasher::hash_fields(&expected).unwrap());
        assert_eq!(posts[0].location.as_deref(), Some("objects/post/hello.toml"));
        assert_eq!(
            f.remote.file("main", "objects/post/hello.toml").as_deref(),
            Some("title = \"Hello\"\n")
        );
        let log = f.remote.log("main");
        assert_eq!(log[0].message, "Changes from Folio Editor");
        assert_eq!(log[0].author, author());
    }

    #[tokio::test]
    async fn report_maps_ledger_ids_to_new_ids() {
        let mut f = fixture(&[
            ("objects/post/a.toml", "title = \"A\"\n"),
            ("objects/post/b.toml", "title = \"B\"\n"),
        ])
        .await;
        let a = f.engine.store().all("post")[0].id;
        let b = f.engine.store().all("post")[1].id;
        let temp = ObjectId::new_temp();
        let snapshot = ledger(
            vec![
                title(a, "A2"),
                Change::new(ChangeKey::field(temp, "name"), "post", "c".into()),
                title(temp, "C"),
            ],
            vec![],
        );
        let report = f
            .engine
            .sync(&snapshot, &author(), &Anonymous, &Silent)
            .await
            .unwrap();

        let by_name = |name: &str| {
            report.objects.objects["post"]
                .iter()
                .find(|o| o.name == name)
                .map(|o| o.id)
                .unwrap()
        };
        assert_eq!(report.renamed.len(), 2);
        assert_eq!(report.renamed[&a], by_name("a"));
        assert_eq!(report.renamed[&temp], by_name("c"));
        assert!(!report.renamed.contains_key(&b));
    }

    #[tokio::test]
    async fn remote_deletion_of_edited_object_fails_without_commit() {
        let mut f = fixture(&[("objects/post/a.toml", "title = \"A\"\n")]).await;
        let id = f.engine.store().all("post")[0].id;
        f.remote.commit_files(
            "main",
            &Author::new("Bob", "bob@example.com"),
            "remove a",
            [("objects/post/a.toml", None)],
        );
        let tip = f.remote.tip("main");

        let err = f
            .engine
            .sync(&ledger(vec![title(id, "A2")], vec![]), &author(), &Anonymous, &Silent)
            .await
            .unwrap_err();
        assert_eq!(err.error, SyncError::MissingObject(id));
        assert_eq!(err.phase, Some(SyncPhase::ReplayingChanges));
        assert!(!err.committed);
        assert_eq!(f.remote.calls(RemoteOp::Push), 0);
        assert_eq!(f.repo.head(), tip);
        assert!(!f.repo.is_dirty());
    }

    #[tokio::test]
    async fn missing_author_email_fails_before_network() {
        let mut f = fixture(&[]).await;
        let err = f
            .engine
            .sync(&LedgerSnapshot::default(), &Author::new("Ada", ""), &Anonymous, &Silent)
            .await
            .unwrap_err();
        assert!(matches!(err.error, SyncError::Validation(_)));
        assert_eq!(err.phase, None);
        assert_eq!(f.remote.calls(RemoteOp::Pull), 0);
    }

    #[tokio::test]
    async fn replay_sees_pulled_state() {
        let mut f = fixture(&[("objects/post/a.toml", "title = \"A\"\n")]).await;
        f.remote.commit_files(
            "main",
            &Author::new("Bob", "bob@example.com"),
            "add b",
            [("objects/post/b.toml", Some("title = \"B\"\n"))],
        );
        // An edit made against the object Bob just pushed.
        let b = ContentHasher::hash_fields(&TomlCodec.parse("title = \"B\"\n").unwrap()).unwrap();
        let report = f
            .engine
            .sync(&ledger(vec![title(b, "B2")], vec![]), &author(), &Anonymous, &Silent)
            .await
            .unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(
            f.remote.file("main", "objects/post/b.toml").as_deref(),
            Some("title = \"B2\"\n")
        );
        assert_eq!(f.remote.file("main", "objects/post/a.toml").as_deref(), Some("title = \"A\"\n"));
    }

    #[tokio::test]
    async fn whole_deletion_removes_file() {
        let mut f = fixture(&[("objects/post/a.toml", "title = \"A\"\n")]).await;
        let id = f.engine.store().all("post")[0].id;
        let report = f
            .engine
            .sync(
                &ledger(vec![title(id, "ignored")], vec![Deletion::object(id)]),
                &author(),
                &Anonymous,
                &Silent,
            )
            .await
            .unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(f.remote.file("main", "objects/post/a.toml"), None);
        assert!(f.engine.store().all("post").is_empty());
    }

    #[tokio::test]
    async fn failed_push_keeps_commit_and_can_be_retried() {
        let mut f = fixture(&[("objects/post/a.toml", "title = \"A\"\n")]).await;
        let id = f.engine.store().all("post")[0].id;
        f.remote
            .fail_next(RemoteOp::Push, GitError::Network("connection reset".into()));

        let err = f
            .engine
            .sync(&ledger(vec![title(id, "A2")], vec![]), &author(), &Anonymous, &Silent)
            .await
            .unwrap_err();
        assert_eq!(err.phase, Some(SyncPhase::Pushing));
        assert!(err.committed);
        assert!(matches!(err.error, SyncError::Network(_)));
        let sha = f.engine.unpushed().map(str::to_string).unwrap();
        assert_eq!(f.repo.head().as_deref(), Some(sha.as_str()));
        let rewritten = f.engine.store().all("post")[0].id;
        assert_eq!(
            f.engine.store().all("post")[0].fields["title"],
            FieldValue::string("A2")
        );
        assert_eq!(err.renamed.get(&id), Some(&rewritten));

        let pushed = f.engine.retry_push(&Anonymous, &Silent).await.unwrap();
        assert_eq!(pushed, sha);
        assert_eq!(f.remote.tip("main"), Some(sha));
        assert_eq!(f.engine.unpushed(), None);
        assert_eq!(
            f.engine.retry_push(&Anonymous, &Silent).await.unwrap_err().error,
            SyncError::NothingToPush
        );
    }

    #[tokio::test]
    async fn new_engine_finds_commit_left_unpushed() {
        let mut f = fixture(&[("objects/post/a.toml", "title = \"A\"\n")]).await;
        let id = f.engine.store().all("post")[0].id;
        f.remote
            .fail_next(RemoteOp::Push, GitError::Network("timeout".into()));
        f.engine
            .sync(&ledger(vec![title(id, "A2")], vec![]), &author(), &Anonymous, &Silent)
            .await
            .unwrap_err();

        let mut restarted = SyncEngine::new(f.repo.clone(), Arc::new(TomlCodec), EngineConfig::default());
        assert_eq!(restarted.unpushed(), None);
        let sha = restarted.retry_push(&Anonymous, &Silent).await.unwrap();
        assert_eq!(f.remote.tip("main"), Some(sha));
    }

    #[tokio::test]
    async fn next_sync_pushes_earlier_commit() {
        let mut f = fixture(&[("objects/post/a.toml", "title = \"A\"\n")]).await;
        let id = f.engine.store().all("post")[0].id;
        f.remote
            .fail_next(RemoteOp::Push, GitError::Network("timeout".into()));
        f.engine
            .sync(&ledger(vec![title(id, "A2")], vec![]), &author(), &Anonymous, &Silent)
            .await
            .unwrap_err();

        let report = f
            .engine
            .sync(&LedgerSnapshot::default(), &author(), &Anonymous, &Silent)
            .await
            .unwrap();
        assert_eq!(report.commit, None);
        assert_eq!(f.engine.unpushed(), None);
        assert_eq!(
            f.remote.file("main", "objects/post/a.toml").as_deref(),
            Some("title = \"A2\"\n")
        );
    }

    #[tokio::test]
    async fn failed_write_restores_working_tree() {
        let mut f = fixture(&[("objects/post/a.toml", "title = \"A\"\n")]).await;
        let id = f.engine.store().all("post")[0].id;
        let temp = ObjectId::new_temp();
        f.repo.fail_writes_to("objects/post/new.toml");
        let head = f.repo.head();

        let err = f
            .engine
            .sync(
                &ledger(
                    vec![
                        title(id, "A2"),
                        Change::new(ChangeKey::field(temp, "name"), "post", "new".into()),
                    ],
                    vec![],
                ),
                &author(),
                &Anonymous,
                &Silent,
            )
            .await
            .unwrap_err();
        assert_eq!(err.phase, Some(SyncPhase::WritingFiles));
        assert!(matches!(err.error, SyncError::Filesystem { .. }));
        assert!(!f.repo.is_dirty());
        assert_eq!(f.repo.head(), head);
        assert_eq!(
            f.repo.read_file("objects/post/a.toml").await.unwrap(),
            "title = \"A\"\n"
        );
        assert_eq!(f.remote.calls(RemoteOp::Push), 0);
    }

    #[tokio::test]
    async fn empty_ledger_refreshes_without_commit() {
        let mut f = fixture(&[]).await;
        let head = f.repo.head();
        f.remote.commit_files(
            "main",
            &Author::new("Bob", "bob@example.com"),
            "add",
            [("objects/post/b.toml", Some("title = \"B\"\n"))],
        );
        let report = f
            .engine
            .sync(&LedgerSnapshot::default(), &author(), &Anonymous, &Silent)
            .await
            .unwrap();
        assert_eq!(report.commit, None);
        assert_eq!(report.objects.objects["post"].len(), 1);
        assert_ne!(f.repo.head(), head);
        assert_eq!(f.repo.head(), f.remote.tip("main"));
        assert_eq!(f.remote.calls(RemoteOp::Push), 0);
    }

    #[tokio::test]
    async fn auth_failure_aborts_at_pull() {
        let mut f = fixture(&[("objects/post/a.toml", "title = \"A\"\n")]).await;
        let id = f.engine.store().all("post")[0].id;
        f.remote
            .require_credentials(Credentials::new("tok", TokenAuth::PASSWORD));
        let snapshot = ledger(vec![title(id, "A2")], vec![]);

        let err = f
            .engine
            .sync(&snapshot, &author(), &Anonymous, &Silent)
            .await
            .unwrap_err();
        assert_eq!(err.phase, Some(SyncPhase::Pulling));
        assert!(matches!(err.error, SyncError::Auth(_)));
        assert!(!f.repo.is_dirty());

        f.engine
            .sync(&snapshot, &author(), &TokenAuth::new("tok"), &Silent)
            .await
            .unwrap();
        assert_eq!(
            f.remote.file("main", "objects/post/a.toml").as_deref(),
            Some("title = \"A2\"\n")
        );
    }

    #[tokio::test]
    async fn progress_runs_through_phases_in_order() {
        let mut f = fixture(&[("objects/post/a.toml", "title = \"A\"\n")]).await;
        let id = f.engine.store().all("post")[0].id;
        let seen = Mutex::new(Vec::new());
        let observer = |p: Progress| seen.lock().unwrap().push(p);
        f.engine
            .sync(&ledger(vec![title(id, "A2")], vec![]), &author(), &Anonymous, &observer)
            .await
            .unwrap();

        let seen = seen.into_inner().unwrap();
        let mut phases: Vec<SyncPhase> = seen.iter().map(|p| p.phase).collect();
        phases.dedup();
        assert_eq!(
            phases,
            vec![
                SyncPhase::Pulling,
                SyncPhase::ReplayingChanges,
                SyncPhase::WritingFiles,
                SyncPhase::Committing,
                SyncPhase::Pushing,
                SyncPhase::Refreshing,
            ]
        );
        assert!(seen.windows(2).all(|w| w[0].fraction <= w[1].fraction));
        assert!(seen.last().unwrap().is_complete());
    }

    #[tokio::test]
    async fn lookup_commits_returns_known_shas() {
        let f = fixture(&[]).await;
        let head = f.repo.head().unwrap();
        let commits = f
            .engine
            .lookup_commits(&[head.clone(), "0".repeat(40)])
            .await
            .unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].sha, head);
        assert_eq!(commits[0].message, "seed");
    }
}
