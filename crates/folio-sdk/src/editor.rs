use std::sync::{Arc, Mutex, MutexGuard};

use folio_git::CommitInfo;
use folio_ledger::{
    ChangeLedger, ConsistencyError, LedgerError, LedgerSnapshot, MaterializedObjects, PersistedState,
    StateStore,
};
use folio_protocol::{
    CloneRequest, ConfirmData, ErrorData, LookupCommitsRequest, Operation, RetryPushRequest,
    SyncRequest,
};
use folio_schema::{SchemaError, TypeRegistry};
use folio_store::{ObjectStore, ObjectsData};
use folio_sync::Progress;
use folio_types::{Author, Change, ChangeKey, Deletion, FieldValue, Object, ObjectId};
use folio_worker::{into_result, WorkerClient, WorkerError, WorkerResult};
use tracing::{debug, info, warn};

use crate::config::EditorConfig;
use crate::error::{SdkError, SdkResult};

#[derive(Default)]
struct Session {
    ledger: ChangeLedger,
    store: ObjectStore,
    /// Bumped whenever a new store snapshot arrives.
    generation: u64,
    overlay: Option<((u64, u64), Arc<MaterializedObjects>)>,
    repository: Option<String>,
    branch: Option<String>,
    progress: Option<Progress>,
    errors: Vec<ErrorData>,
}

impl Session {
    fn replace_store(&mut self, data: ObjectsData) {
        self.store = ObjectStore::from_snapshot(data);
        self.generation += 1;
        self.overlay = None;
        debug!(generation = self.generation, objects = self.store.len(), "store replaced");
    }

    /// The edited view, rebuilt only when the store or the ledger changed.
    fn view(&mut self) -> Result<Arc<MaterializedObjects>, ConsistencyError> {
        // Nothing to layer edits over until the first snapshot arrives.
        if self.generation == 0 {
            return Ok(Arc::default());
        }
        let key = (self.generation, self.ledger.version());
        if let Some((cached, objects)) = &self.overlay {
            if *cached == key {
                return Ok(objects.clone());
            }
        }
        let objects = Arc::new(self.ledger.materialize(&self.store)?);
        self.overlay = Some((key, objects.clone()));
        Ok(objects)
    }

    fn persisted(&self) -> PersistedState {
        PersistedState::new(self.repository.clone(), self.branch.clone(), &self.ledger)
    }
}

/// What came back for one request: the last object snapshot, if any, and
/// the terminal response.
struct Exchange {
    objects: Option<ObjectsData>,
    terminal: WorkerResult<Operation>,
}

fn expect_confirm(op: Operation) -> SdkResult<ConfirmData> {
    match op {
        Operation::Confirm(confirm) => Ok(confirm),
        other => Err(WorkerError::UnexpectedResponse(other.name()).into()),
    }
}

/// The editing side of folio.
///
/// Owns the pending edits and the last object snapshot received from the
/// worker, and derives the edited view from the two. Every edit is saved
/// to the [`StateStore`] as soon as it is recorded.
///
/// All methods take `&self`, so an `Arc<Editor>` can keep accepting edits
/// while a [`sync`](Self::sync) is waiting on the network. The ledger is
/// frozen from the start of a sync until the worker reports it has left
/// the replay phase.
pub struct Editor {
    client: WorkerClient,
    config: EditorConfig,
    state: Arc<dyn StateStore>,
    session: Mutex<Session>,
}

impl Editor {
    /// Open an editor, restoring the last session from `state`.
    pub fn open(client: WorkerClient, config: EditorConfig, state: Arc<dyn StateStore>) -> Self {
        let persisted = PersistedState::load(state.as_ref());
        let session = Session {
            ledger: persisted.ledger(),
            repository: persisted.repository,
            branch: persisted.branch,
            ..Session::default()
        };
        info!(
            repository = ?session.repository,
            pending = session.ledger.changes().len() + session.ledger.deletions().len(),
            "editor opened"
        );
        Self {
            client,
            config,
            state,
            session: Mutex::new(session),
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn client(&self) -> &WorkerClient {
        &self.client
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().expect("lock poisoned")
    }

    fn save(&self, session: &Session) -> SdkResult<()> {
        session.persisted().save(self.state.as_ref())?;
        Ok(())
    }

    /// Materialize, logging and persisting the reset if the ledger no
    /// longer fits the store.
    fn view(&self, session: &mut Session) -> SdkResult<Arc<MaterializedObjects>> {
        match session.view() {
            Ok(view) => Ok(view),
            Err(e) => {
                session.errors.push(e.clone().into());
                self.save(session)?;
                Err(LedgerError::Consistency(e).into())
            }
        }
    }

    // ---- Views ----

    /// Every object with pending edits applied.
    pub fn objects(&self) -> SdkResult<Arc<MaterializedObjects>> {
        let mut session = self.session();
        self.view(&mut session)
    }

    pub fn object(&self, id: &ObjectId) -> SdkResult<Option<Object>> {
        Ok(self.objects()?.get(id).cloned())
    }

    pub fn registry(&self) -> TypeRegistry {
        self.session().store.registry().clone()
    }

    pub fn pending(&self) -> LedgerSnapshot {
        self.session().ledger.snapshot()
    }

    pub fn has_pending(&self) -> bool {
        self.session().ledger.has_pending()
    }

    /// Pending changes to `id`.
    pub fn changed_fields(&self, id: &ObjectId) -> Vec<Change> {
        self.session().ledger.changed_fields(id).cloned().collect()
    }

    pub fn change(&self, key: &ChangeKey) -> Option<Change> {
        self.session().ledger.get(key).cloned()
    }

    pub fn is_syncing(&self) -> bool {
        self.session().ledger.is_frozen()
    }

    /// Progress of the running operation. Cleared once it reports completion.
    pub fn progress(&self) -> Option<Progress> {
        self.session().progress
    }

    /// Drain the errors reported since the last call.
    pub fn take_errors(&self) -> Vec<ErrorData> {
        std::mem::take(&mut self.session().errors)
    }

    pub fn repository(&self) -> Option<String> {
        self.session().repository.clone()
    }

    pub fn branch(&self) -> Option<String> {
        self.session().branch.clone()
    }

    // ---- Edits ----

    /// Record a change after checking it against the current types.
    pub fn record(&self, change: Change) -> SdkResult<()> {
        let mut session = self.session();
        session.store.registry().check_change(&change)?;
        session.ledger.record_change(change)?;
        self.save(&session)
    }

    fn object_type(&self, id: &ObjectId) -> SdkResult<String> {
        let mut session = self.session();
        self.view(&mut session)?
            .get(id)
            .map(|object| object.object_type.clone())
            .ok_or(SdkError::ObjectNotFound(*id))
    }

    /// Set a top-level field of an existing or new object.
    pub fn update(&self, id: ObjectId, field: &str, value: FieldValue) -> SdkResult<()> {
        let object_type = self.object_type(&id)?;
        self.record(Change::new(ChangeKey::field(id, field), object_type, value))
    }

    /// Set `child_field` of element `index` of the child list `field`.
    pub fn update_child(
        &self,
        id: ObjectId,
        field: &str,
        index: usize,
        child_field: &str,
        value: FieldValue,
    ) -> SdkResult<()> {
        let object_type = self.object_type(&id)?;
        self.record(Change::new(
            ChangeKey::child(id, field, index, child_field),
            object_type,
            value,
        ))
    }

    /// Create a provisional object with every field at its default. Returns
    /// its `temp:` id, which stays valid until the object is synced.
    pub fn add_object(&self, name: &str, object_type: &str) -> SdkResult<ObjectId> {
        if name.trim().is_empty() {
            return Err(SdkError::InvalidOperation("a new object needs a name".into()));
        }
        let mut guard = self.session();
        let session = &mut *guard;
        let definition = session
            .store
            .registry()
            .get(object_type)
            .ok_or_else(|| SchemaError::UnknownType(object_type.to_string()))?;

        let id = ObjectId::new_temp();
        let mut changes: Vec<Change> = definition
            .fields
            .iter()
            .map(|(field, def)| Change::new(ChangeKey::field(id, field.clone()), object_type, def.default_value()))
            .collect();
        changes.push(Change::new(ChangeKey::field(id, "name"), object_type, FieldValue::string(name)));
        changes.push(Change::new(
            ChangeKey::field(id, "location"),
            object_type,
            FieldValue::string(self.config.object_location(object_type, name)),
        ));
        for change in changes {
            session.ledger.record_change(change)?;
        }
        self.save(session)?;
        info!(id = %id, object_type, name, "object added");
        Ok(id)
    }

    /// Add a child element at `index` of `field` with every child field at
    /// its default.
    pub fn add_child(&self, object_type: &str, parent: ObjectId, field: &str, index: usize) -> SdkResult<()> {
        let mut guard = self.session();
        let session = &mut *guard;
        let view = self.view(session)?;
        if !view
            .get(&parent)
            .is_some_and(|object| object.object_type == object_type)
        {
            return Err(SdkError::ObjectNotFound(parent));
        }
        let definition = session
            .store
            .registry()
            .field(object_type, field)
            .ok_or_else(|| SchemaError::UnknownField {
                type_name: object_type.to_string(),
                field: field.to_string(),
            })?
            .as_children()
            .ok_or_else(|| SchemaError::NotChildField {
                type_name: object_type.to_string(),
                field: field.to_string(),
            })?
            .clone();

        let changes: Vec<Change> = if definition.fields.is_empty() {
            let key = ChangeKey {
                object_id: parent,
                field: field.to_string(),
                index: Some(index),
                child_field: None,
            };
            vec![Change::new(
                key,
                object_type,
                FieldValue::Children(vec![Some(definition.default_element())]),
            )]
        } else {
            definition
                .fields
                .iter()
                .map(|(child, kind)| {
                    Change::new(
                        ChangeKey::child(parent, field, index, child.clone()),
                        object_type,
                        kind.default_value(),
                    )
                })
                .collect()
        };
        for change in changes {
            session.ledger.record_change(change)?;
        }
        self.save(session)
    }

    /// Delete a whole object, or with `field` and `index` one child element.
    pub fn remove(&self, id: ObjectId, field: Option<&str>, index: Option<usize>) -> SdkResult<()> {
        let deletion = Deletion {
            object_id: id,
            field: field.map(str::to_string),
            index,
        };
        let mut session = self.session();
        session.ledger.record_deletion(deletion)?;
        self.save(&session)
    }

    /// Discard every pending edit.
    pub fn reset(&self) -> SdkResult<()> {
        let mut session = self.session();
        session.ledger.reset()?;
        self.save(&session)?;
        info!("pending edits discarded");
        Ok(())
    }

    // ---- Worker operations ----

    fn on_progress(&self, progress: Progress, thaw: bool) {
        let mut session = self.session();
        if thaw && progress.phase.is_past_replay() && session.ledger.is_frozen() {
            session.ledger.thaw();
            debug!(phase = %progress.phase, "ledger thawed");
        }
        session.progress = (!progress.is_complete()).then_some(progress);
    }

    async fn exchange(&self, operation: Operation) -> Exchange {
        let thaw = matches!(operation, Operation::Sync(_));
        let mut objects = None;
        let terminal = match self.client.start(operation) {
            Err(e) => Err(e),
            Ok(mut pending) => loop {
                match pending.next().await {
                    Ok(Some(Operation::Progress(progress))) => self.on_progress(progress, thaw),
                    Ok(Some(Operation::Objects(data))) => objects = Some(data),
                    Ok(Some(op)) if op.is_terminal() => break into_result(op),
                    Ok(Some(op)) => break Err(WorkerError::UnexpectedResponse(op.name())),
                    Ok(None) => break Err(WorkerError::Closed),
                    Err(e) => break Err(e),
                }
            },
        };
        if let Err(e) = &terminal {
            warn!(error = %e, "worker request failed");
            self.session().errors.push(e.to_error_data());
        }
        Exchange { objects, terminal }
    }

    /// Clone `url` at `branch` (or the configured default) into the worker's
    /// working tree and load its objects. Pending edits are discarded when
    /// the repository or branch differs from the previous session's.
    pub async fn clone(&self, url: &str, branch: Option<&str>, token: Option<String>) -> SdkResult<()> {
        let branch = branch.unwrap_or(&self.config.default_branch).to_string();
        info!(url, branch = %branch, "cloning");
        let request = Operation::Clone(CloneRequest {
            url: url.to_string(),
            branch: branch.clone(),
            token,
        });
        let Exchange { objects, terminal } = self.exchange(request).await;
        expect_confirm(terminal?)?;

        let mut session = self.session();
        let same = session.repository.as_deref() == Some(url) && session.branch.as_deref() == Some(&*branch);
        if !same && session.ledger.has_pending() {
            match session.ledger.reset() {
                Ok(()) => info!("discarded edits for the previous repository"),
                Err(e) => warn!(error = %e, "cannot discard edits for the previous repository"),
            }
        }
        session.repository = Some(url.to_string());
        session.branch = Some(branch);
        session.progress = None;
        if let Some(data) = objects {
            session.replace_store(data);
        }
        self.save(&session)
    }

    /// Reload objects from the worker's working tree.
    pub async fn refresh(&self) -> SdkResult<()> {
        let Exchange { objects, terminal } = self.exchange(Operation::RefreshObjects).await;
        expect_confirm(terminal?)?;
        let mut session = self.session();
        session.progress = None;
        if let Some(data) = objects {
            session.replace_store(data);
        }
        Ok(())
    }

    /// Ship every pending edit. Returns the new commit, or `None` when there
    /// was nothing to commit.
    ///
    /// Entries shipped in a commit leave the ledger, including when the
    /// commit was made but the push failed; [`retry_push`](Self::retry_push)
    /// then finishes the job. On any other failure the ledger is kept as is.
    pub async fn sync(&self, author: &Author, token: Option<String>) -> SdkResult<Option<String>> {
        let snapshot = {
            let mut session = self.session();
            if session.ledger.is_frozen() {
                return Err(LedgerError::SyncInProgress.into());
            }
            session.ledger.freeze();
            session.ledger.snapshot()
        };
        info!(
            changes = snapshot.changes.len(),
            deletions = snapshot.deletions.len(),
            "sync started"
        );

        let request = Operation::Sync(SyncRequest::new(snapshot.clone(), author.clone(), token));
        let Exchange { objects, terminal } = self.exchange(request).await;

        {
            let mut session = self.session();
            session.ledger.thaw();
            session.progress = None;
            let shipped = match &terminal {
                Ok(Operation::Confirm(confirm)) => Some(&confirm.renamed),
                Err(WorkerError::Engine(data)) if data.committed => Some(&data.renamed),
                _ => None,
            };
            if let Some(renamed) = shipped {
                if let Some(data) = objects {
                    session.replace_store(data);
                }
                session.ledger.remove_shipped(&snapshot);
                session.ledger.remap(renamed);
            }
            self.save(&session)?;
        }

        let confirm = expect_confirm(terminal?)?;
        info!(commit = ?confirm.commit, "sync finished");
        Ok(confirm.commit)
    }

    /// Push a commit left behind by a failed push.
    pub async fn retry_push(&self, token: Option<String>) -> SdkResult<String> {
        let Exchange { terminal, .. } = self.exchange(Operation::RetryPush(RetryPushRequest { token })).await;
        self.session().progress = None;
        expect_confirm(terminal?)?
            .commit
            .ok_or_else(|| WorkerError::UnexpectedResponse("confirm").into())
    }

    /// Details of the commits among `shas` known to the working tree.
    pub async fn lookup_commits(&self, shas: Vec<String>) -> SdkResult<Vec<CommitInfo>> {
        let Exchange { terminal, .. } = self
            .exchange(Operation::LookupCommits(LookupCommitsRequest { shas }))
            .await;
        match terminal? {
            Operation::Commits(commits) => Ok(commits),
            other => Err(WorkerError::UnexpectedResponse(other.name()).into()),
        }
    }
}
