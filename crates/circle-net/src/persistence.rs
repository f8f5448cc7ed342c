//! Background persistence work queue.
//!
//! Writes are fire-and-forget: the controller enqueues a job and moves on.
//! One worker task drains the queue in order, so a history load always
//! observes every write enqueued before it. Failures are logged and dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use circle_shared::error::BridgeError;
use circle_shared::persistence::MessageStore;
use circle_shared::types::MessageRecord;

/// Which rows a history load should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryScope {
    All,
    QueuedOnly,
}

enum PersistJob {
    Insert(MessageRecord),
    DeleteByPeer(String),
    Load {
        peer_id: String,
        scope: HistoryScope,
        reply: oneshot::Sender<Result<Vec<MessageRecord>, BridgeError>>,
    },
}

/// Handle to the persistence worker. Cheap to clone.
#[derive(Clone)]
pub struct PersistenceQueue {
    tx: Option<mpsc::UnboundedSender<PersistJob>>,
}

impl PersistenceQueue {
    /// Spawn the worker task for `store`.
    pub fn spawn(store: Arc<dyn MessageStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(store, rx));
        Self { tx: Some(tx) }
    }

    /// A queue that drops every job. Used when no store is configured.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn insert(&self, record: MessageRecord) {
        self.enqueue(PersistJob::Insert(record));
    }

    pub fn delete_by_peer(&self, peer_id: impl Into<String>) {
        self.enqueue(PersistJob::DeleteByPeer(peer_id.into()));
    }

    /// Queue a history load. The receiver resolves once every earlier job ran.
    pub fn load(
        &self,
        peer_id: impl Into<String>,
        scope: HistoryScope,
    ) -> oneshot::Receiver<Result<Vec<MessageRecord>, BridgeError>> {
        let (reply, rx) = oneshot::channel();
        let job = PersistJob::Load {
            peer_id: peer_id.into(),
            scope,
            reply,
        };
        if let Some(tx) = &self.tx {
            if let Err(mpsc::error::SendError(PersistJob::Load { reply, .. })) = tx.send(job) {
                let _ = reply.send(Err(BridgeError::Unavailable));
            }
        } else if let PersistJob::Load { reply, .. } = job {
            let _ = reply.send(Ok(Vec::new()));
        }
        rx
    }

    fn enqueue(&self, job: PersistJob) {
        if let Some(tx) = &self.tx {
            if tx.send(job).is_err() {
                warn!("Persistence worker gone, dropping job");
            }
        }
    }
}

async fn worker(store: Arc<dyn MessageStore>, mut rx: mpsc::UnboundedReceiver<PersistJob>) {
    info!("Persistence worker started");

    while let Some(job) = rx.recv().await {
        match job {
            PersistJob::Insert(record) => {
                let id = record.id.clone();
                match store.insert(record).await {
                    Ok(()) => debug!(msg_id = %id, "Persisted message"),
                    Err(e) => warn!(msg_id = %id, error = %e, "Failed to persist message"),
                }
            }
            PersistJob::DeleteByPeer(peer_id) => match store.delete_by_peer(&peer_id).await {
                Ok(removed) => debug!(peer = %peer_id, removed, "Deleted conversation"),
                Err(e) => warn!(peer = %peer_id, error = %e, "Failed to delete conversation"),
            },
            PersistJob::Load {
                peer_id,
                scope,
                reply,
            } => {
                let result = match scope {
                    HistoryScope::All => store.query_by_peer(&peer_id).await,
                    HistoryScope::QueuedOnly => store.query_queued_by_peer(&peer_id).await,
                };
                if let Err(e) = &result {
                    warn!(peer = %peer_id, error = %e, "Failed to load history");
                }
                let _ = reply.send(result);
            }
        }
    }

    info!("Persistence worker stopped");
}
