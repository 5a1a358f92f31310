use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use folio_git::CommitInfo;
use folio_protocol::{
    CorrelationId, ErrorData, FrameCodec, LookupCommitsRequest, Operation, ProtocolError,
    WorkerMessage,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::runtime::{FrameReceiver, FrameSender};

const EVENT_CAPACITY: usize = 256;

type Pending = Arc<Mutex<HashMap<CorrelationId, mpsc::UnboundedSender<Operation>>>>;

/// The caller side of the transport.
///
/// Every request gets a correlation id; responses carrying it are routed
/// back to the [`PendingRequest`] that sent it. Non-terminal messages
/// (`progress`, `objects`) are also broadcast to every
/// [`subscribe`](Self::subscribe) receiver.
#[derive(Clone)]
pub struct WorkerClient {
    outbound: FrameSender,
    pending: Pending,
    events: broadcast::Sender<WorkerMessage>,
}

impl WorkerClient {
    /// Attach to a worker's channels and start routing its responses.
    pub fn connect(outbound: FrameSender, inbound: FrameReceiver) -> Self {
        let pending: Pending = Arc::default();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        tokio::spawn(route(inbound, pending.clone(), events.clone()));
        Self {
            outbound,
            pending,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerMessage> {
        self.events.subscribe()
    }

    /// Send `operation` under a fresh correlation id.
    pub fn start(&self, operation: Operation) -> WorkerResult<PendingRequest> {
        self.start_with(CorrelationId::new(), operation)
    }

    /// Send `operation` under `id`, which must not be outstanding.
    pub fn start_with(&self, id: CorrelationId, operation: Operation) -> WorkerResult<PendingRequest> {
        let message = WorkerMessage::new(id.clone(), operation);
        let frame = FrameCodec::encode(&message)?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut pending = self.pending.lock().expect("lock poisoned");
            if pending.contains_key(&id) {
                return Err(WorkerError::DuplicateCorrelation(id));
            }
            pending.insert(id.clone(), tx);
        }
        if self.outbound.send(frame).is_err() {
            self.pending.lock().expect("lock poisoned").remove(&id);
            return Err(WorkerError::Closed);
        }
        debug!(id = %id, operation = message.operation.name(), "request sent");
        Ok(PendingRequest {
            id,
            rx,
            done: false,
        })
    }

    /// Send `operation` and wait for its terminal response.
    pub async fn request(&self, operation: Operation) -> WorkerResult<Operation> {
        self.start(operation)?.finish().await
    }

    pub async fn lookup_commits(&self, shas: Vec<String>) -> WorkerResult<Vec<CommitInfo>> {
        match self
            .request(Operation::LookupCommits(LookupCommitsRequest { shas }))
            .await?
        {
            Operation::Commits(commits) => Ok(commits),
            other => Err(WorkerError::UnexpectedResponse(other.name())),
        }
    }

    /// Number of requests still waiting for a terminal response.
    pub fn outstanding(&self) -> usize {
        self.pending.lock().expect("lock poisoned").len()
    }
}

async fn route(mut inbound: FrameReceiver, pending: Pending, events: broadcast::Sender<WorkerMessage>) {
    while let Some(frame) = inbound.recv().await {
        let message = match FrameCodec::decode_exact(&frame) {
            Ok(message) => message,
            Err(e) => {
                reject_undecodable(&pending, &frame, e);
                continue;
            }
        };
        let terminal = message.operation.is_terminal();
        if !terminal {
            // No subscribers is fine.
            let _ = events.send(message.clone());
        }
        let sender = {
            let mut pending = pending.lock().expect("lock poisoned");
            if terminal {
                pending.remove(&message.correlation_id)
            } else {
                pending.get(&message.correlation_id).cloned()
            }
        };
        match sender {
            Some(tx) => {
                let _ = tx.send(message.operation);
            }
            None => debug!(id = %message.correlation_id, "response for unknown request"),
        }
    }
    // Dropping the senders fails every outstanding request with `Closed`.
    pending.lock().expect("lock poisoned").clear();
}

/// Fail the request an undecodable response was meant for. Without a
/// readable correlation id there is no telling which one, so every
/// outstanding request fails.
fn reject_undecodable(pending: &Pending, frame: &[u8], error: ProtocolError) {
    let data = ErrorData::from(error);
    let mut pending = pending.lock().expect("lock poisoned");
    match FrameCodec::peek_correlation(frame) {
        Some(id) => {
            warn!(id = %id, error = %data.message, "undecodable response");
            if let Some(tx) = pending.remove(&id) {
                let _ = tx.send(Operation::Error(data));
            }
        }
        None => {
            warn!(
                error = %data.message,
                outstanding = pending.len(),
                "undecodable response without correlation id"
            );
            for (_, tx) in pending.drain() {
                let _ = tx.send(Operation::Error(data.clone()));
            }
        }
    }
}

/// A request in flight.
#[derive(Debug)]
pub struct PendingRequest {
    id: CorrelationId,
    rx: mpsc::UnboundedReceiver<Operation>,
    done: bool,
}

impl PendingRequest {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// The next message for this request, or `None` once the terminal
    /// response has been returned.
    pub async fn next(&mut self) -> WorkerResult<Option<Operation>> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(op) => {
                self.done = op.is_terminal();
                Ok(Some(op))
            }
            None => Err(WorkerError::Closed),
        }
    }

    /// Skip to the terminal response. An `error` response becomes
    /// [`WorkerError::Engine`].
    pub async fn finish(mut self) -> WorkerResult<Operation> {
        while let Some(op) = self.next().await? {
            if op.is_terminal() {
                return into_result(op);
            }
        }
        Err(WorkerError::Closed)
    }
}

/// Split a terminal response into success or the engine's error.
pub fn into_result(op: Operation) -> WorkerResult<Operation> {
    match op {
        Operation::Error(data) => Err(WorkerError::Engine(data)),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_protocol::{ConfirmData, ErrorKind};

    /// A client wired to hand-driven channels instead of a real worker.
    fn loopback() -> (WorkerClient, FrameReceiver, FrameSender) {
        let (to_worker, from_client) = mpsc::unbounded_channel();
        let (to_client, from_worker) = mpsc::unbounded_channel();
        (WorkerClient::connect(to_worker, from_worker), from_client, to_client)
    }

    fn reply(to: &CorrelationId, op: Operation) -> Vec<u8> {
        FrameCodec::encode(&WorkerMessage::new(to.clone(), op)).unwrap()
    }

    #[tokio::test]
    async fn responses_are_matched_by_id() {
        let (client, mut requests, responses) = loopback();
        let a = client.start(Operation::RefreshObjects).unwrap();
        let b = client.start(Operation::RefreshObjects).unwrap();
        assert_eq!(client.outstanding(), 2);

        let first = FrameCodec::decode_exact(&requests.recv().await.unwrap()).unwrap();
        let second = FrameCodec::decode_exact(&requests.recv().await.unwrap()).unwrap();
        assert_eq!(&first.correlation_id, a.id());

        // Answer out of order.
        responses
            .send(reply(&second.correlation_id, Operation::Error(ErrorData::sync_in_progress())))
            .unwrap();
        responses
            .send(reply(&first.correlation_id, Operation::Confirm(ConfirmData::default())))
            .unwrap();

        assert!(matches!(b.finish().await, Err(WorkerError::Engine(_))));
        assert!(matches!(a.finish().await, Ok(Operation::Confirm(_))));
        assert_eq!(client.outstanding(), 0);
    }

    #[tokio::test]
    async fn closed_worker_fails_outstanding_requests() {
        let (client, requests, responses) = loopback();
        let pending = client.start(Operation::RefreshObjects).unwrap();
        drop(responses);
        assert_eq!(pending.finish().await.unwrap_err(), WorkerError::Closed);
        drop(requests);
        assert_eq!(
            client.start(Operation::RefreshObjects).unwrap_err(),
            WorkerError::Closed
        );
    }

    #[tokio::test]
    async fn undecodable_response_fails_its_request() {
        let (client, _requests, responses) = loopback();
        let refresh = client.start(Operation::RefreshObjects).unwrap();
        let other = client.start(Operation::RefreshObjects).unwrap();

        let body = format!(
            r#"{{"correlationId":"{}","operation":"objects","payload":{{"types":7}}}}"#,
            refresh.id()
        );
        responses.send(FrameCodec::frame(body.as_bytes()).unwrap()).unwrap();
        let Err(WorkerError::Engine(data)) = refresh.finish().await else {
            panic!("refresh should fail");
        };
        assert_eq!(data.kind, ErrorKind::Protocol);
        assert_eq!(client.outstanding(), 1);

        // No readable id: everything outstanding fails.
        responses.send(b"\0\0\0\x04junk".to_vec()).unwrap();
        let Err(WorkerError::Engine(data)) = other.finish().await else {
            panic!("other should fail");
        };
        assert_eq!(data.kind, ErrorKind::Protocol);
        assert_eq!(client.outstanding(), 0);
    }

    #[tokio::test]
    async fn unexpected_terminal_is_reported() {
        let (client, mut requests, responses) = loopback();
        let lookup = tokio::spawn({
            let client = client.clone();
            async move { client.lookup_commits(vec!["abc".into()]).await }
        });
        let request = FrameCodec::decode_exact(&requests.recv().await.unwrap()).unwrap();
        responses
            .send(reply(&request.correlation_id, Operation::Confirm(ConfirmData::default())))
            .unwrap();
        assert_eq!(
            lookup.await.unwrap().unwrap_err(),
            WorkerError::UnexpectedResponse("confirm")
        );
    }
}
