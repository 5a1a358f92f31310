use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use folio_git::{Anonymous, AuthProvider, TokenAuth};
use folio_protocol::{
    ConfirmData, ErrorData, ErrorKind, FrameCodec, Operation, WorkerMessage,
};
use folio_sync::{Progress, SyncEngine};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::client::WorkerClient;

/// Encoded frames travelling one way between caller and worker.
pub type FrameSender = UnboundedSender<Vec<u8>>;
pub type FrameReceiver = UnboundedReceiver<Vec<u8>>;

/// Send one message. If it cannot be encoded, the caller gets an `error`
/// under the same correlation id instead and `false` is returned; nothing
/// more should be sent for that request. A lost `progress` is only logged.
fn emit(out: &FrameSender, message: &WorkerMessage) -> bool {
    let (frame, delivered) = match FrameCodec::encode(message) {
        Ok(frame) => (frame, true),
        Err(e) => {
            warn!(
                error = %e,
                id = %message.correlation_id,
                operation = message.operation.name(),
                "cannot encode response"
            );
            if matches!(message.operation, Operation::Progress(_)) {
                return true;
            }
            let mut data = ErrorData::from(e);
            data.message = format!("cannot send {}: {}", message.operation.name(), data.message);
            match FrameCodec::encode(&message.reply(Operation::Error(data))) {
                Ok(frame) => (frame, false),
                Err(e) => {
                    warn!(error = %e, id = %message.correlation_id, "cannot encode error either");
                    return false;
                }
            }
        }
    };
    if out.send(frame).is_err() {
        debug!(operation = message.operation.name(), "caller has gone away");
    }
    delivered
}

fn auth_for(token: Option<&str>) -> Box<dyn AuthProvider> {
    match token {
        Some(token) if !token.is_empty() => Box::new(TokenAuth::new(token)),
        _ => Box::new(Anonymous),
    }
}

/// The engine side of the transport.
///
/// Frames are decoded and dispatched in arrival order. Requests run one at
/// a time against the engine; a sync arriving while another is queued or
/// running is rejected at once with a `SyncInProgress` error.
pub struct Worker {
    engine: SyncEngine,
    outbound: FrameSender,
}

impl Worker {
    pub fn new(engine: SyncEngine, outbound: FrameSender) -> Self {
        Self { engine, outbound }
    }

    /// Serve until `inbound` closes. Queued requests still complete.
    pub async fn run(self, mut inbound: FrameReceiver) {
        let syncing = Arc::new(AtomicBool::new(false));
        let (jobs, queue) = mpsc::unbounded_channel();
        let executor = tokio::spawn(execute(
            self.engine,
            queue,
            self.outbound.clone(),
            syncing.clone(),
        ));

        while let Some(frame) = inbound.recv().await {
            let message = match FrameCodec::decode_exact(&frame) {
                Ok(message) => message,
                Err(e) => {
                    match FrameCodec::peek_correlation(&frame) {
                        Some(id) => {
                            warn!(error = %e, id = %id, "rejecting undecodable request");
                            emit(
                                &self.outbound,
                                &WorkerMessage::new(id, Operation::Error(e.into())),
                            );
                        }
                        None => warn!(error = %e, "dropping undecodable frame"),
                    }
                    continue;
                }
            };
            debug!(
                id = %message.correlation_id,
                operation = message.operation.name(),
                "request received"
            );
            if !message.operation.is_request() {
                let error = ErrorData::new(
                    ErrorKind::Protocol,
                    format!("{} is not a request", message.operation.name()),
                );
                emit(&self.outbound, &message.reply(Operation::Error(error)));
                continue;
            }
            if matches!(message.operation, Operation::Sync(_)) && syncing.swap(true, Ordering::SeqCst) {
                info!(id = %message.correlation_id, "rejecting concurrent sync");
                emit(
                    &self.outbound,
                    &message.reply(Operation::Error(ErrorData::sync_in_progress())),
                );
                continue;
            }
            if jobs.send(message).is_err() {
                break;
            }
        }

        drop(jobs);
        if let Err(e) = executor.await {
            warn!(error = %e, "worker executor failed");
        }
    }
}

async fn execute(
    mut engine: SyncEngine,
    mut queue: UnboundedReceiver<WorkerMessage>,
    out: FrameSender,
    syncing: Arc<AtomicBool>,
) {
    while let Some(request) = queue.recv().await {
        let is_sync = matches!(request.operation, Operation::Sync(_));
        for reply in handle(&mut engine, &request, &out).await {
            if !emit(&out, &request.reply(reply)) {
                break;
            }
        }
        if is_sync {
            syncing.store(false, Ordering::SeqCst);
        }
    }
}

/// Run one request. Progress is emitted as it happens; the returned
/// operations follow it, the terminal one last.
async fn handle(engine: &mut SyncEngine, request: &WorkerMessage, out: &FrameSender) -> Vec<Operation> {
    let observer = |progress: Progress| {
        emit(out, &request.reply(Operation::Progress(progress)));
    };
    let confirm = |commit: Option<String>| {
        Operation::Confirm(ConfirmData {
            commit,
            ..ConfirmData::default()
        })
    };

    match &request.operation {
        Operation::Clone(req) => {
            let auth = auth_for(req.token.as_deref());
            match engine.clone(&req.url, &req.branch, auth.as_ref(), &observer).await {
                Ok(objects) => vec![Operation::Objects(objects), confirm(None)],
                Err(failure) => vec![Operation::Error(failure.into())],
            }
        }
        Operation::RefreshObjects => match engine.refresh(&observer).await {
            Ok(objects) => vec![Operation::Objects(objects), confirm(None)],
            Err(failure) => vec![Operation::Error(failure.into())],
        },
        Operation::Sync(req) => {
            let auth = auth_for(req.token.as_deref());
            match engine.sync(&req.snapshot(), &req.author, auth.as_ref(), &observer).await {
                Ok(report) => vec![
                    Operation::Objects(report.objects),
                    Operation::Confirm(ConfirmData {
                        commit: report.commit,
                        renamed: report.renamed,
                    }),
                ],
                Err(failure) if failure.committed => {
                    vec![Operation::Objects(engine.objects()), Operation::Error(failure.into())]
                }
                Err(failure) => vec![Operation::Error(failure.into())],
            }
        }
        Operation::RetryPush(req) => {
            let auth = auth_for(req.token.as_deref());
            match engine.retry_push(auth.as_ref(), &observer).await {
                Ok(sha) => vec![confirm(Some(sha))],
                Err(failure) => vec![Operation::Error(failure.into())],
            }
        }
        Operation::LookupCommits(req) => match engine.lookup_commits(&req.shas).await {
            Ok(commits) => vec![Operation::Commits(commits)],
            Err(e) => vec![Operation::Error(e.into())],
        },
        other => vec![Operation::Error(ErrorData::new(
            ErrorKind::Protocol,
            format!("{} is not a request", other.name()),
        ))],
    }
}

/// Start a worker for `engine` on the current runtime and connect a client
/// to it.
pub fn spawn(engine: SyncEngine) -> WorkerClient {
    let (to_worker, from_client) = mpsc::unbounded_channel();
    let (to_client, from_worker) = mpsc::unbounded_channel();
    tokio::spawn(Worker::new(engine, to_client).run(from_client));
    WorkerClient::connect(to_worker, from_worker)
}
