//! Protocol worker pool.
//!
//! A fixed number of tasks share the receiving end of the ready queue. Each
//! notification names a connection that has complete lines waiting.
//!
//! ```text
//!   reader tasks ──id──> [ ready queue ] ──> worker 1 ─┐
//!                              ▲          ──> worker 2 ─┼─> try_lock(token)
//!                              │          ──> worker N ─┘       │
//!                              │                                 │ held elsewhere
//!                              └──────────── re-queue ───────────┘
//! ```
//!
//! A worker that wins a connection's read-lock drains every complete line
//! through the connection's state machine and then releases the lock. A
//! worker that loses re-queues the notification, so no readable event is
//! ever dropped. Re-queueing never blocks a worker: when the queue is full
//! the send is finished by a detached task.
//!
//! A worker that empties a read-closed connection asks it to close once its
//! output is flushed.

use crate::commands::Services;
use crate::connection::{Connection, ConnectionId, ConnectionRegistry};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Handle to the running workers.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Starts `count` workers draining `ready`.
    ///
    /// `requeue` must feed the same queue as `ready`.
    pub fn start(
        count: usize,
        ready: mpsc::Receiver<ConnectionId>,
        requeue: mpsc::Sender<ConnectionId>,
        registry: Arc<ConnectionRegistry>,
        services: Services,
    ) -> Self {
        let ready = Arc::new(Mutex::new(ready));
        let shutdown = CancellationToken::new();

        let handles = (1..=count.max(1) as u64)
            .map(|token| {
                let worker = Worker {
                    token,
                    ready: Arc::clone(&ready),
                    requeue: requeue.clone(),
                    registry: Arc::clone(&registry),
                    services: services.clone(),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect::<Vec<_>>();

        info!(workers = handles.len(), "Protocol workers started");
        Self { handles, shutdown }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stops every worker and waits for them to finish their current line.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
        debug!("Protocol workers stopped");
    }
}

struct Worker {
    /// Read-lock token, unique per worker and never zero
    token: u64,
    ready: Arc<Mutex<mpsc::Receiver<ConnectionId>>>,
    requeue: mpsc::Sender<ConnectionId>,
    registry: Arc<ConnectionRegistry>,
    services: Services,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = tokio::select! {
                id = async { self.ready.lock().await.recv().await } => id,
                _ = self.shutdown.cancelled() => return,
            };
            let Some(id) = next else {
                return;
            };
            let Some(conn) = self.registry.get(id) else {
                trace!(conn = %id, "Notification for a closed connection");
                continue;
            };

            if !conn.read_lock().try_lock(self.token) {
                self.requeue(id).await;
                continue;
            }

            self.drain(&conn).await;

            if let Err(e) = conn.read_lock().unlock(self.token) {
                error!(conn = %id, worker = self.token, error = %e, "Read-lock released by non-owner");
            }
        }
    }

    /// Processes every complete line of `conn`. Caller holds the read-lock.
    async fn drain(&self, conn: &Connection) {
        let stats = self.registry.stats();
        let mut state = conn.state().lock().await;

        while let Some(line) = conn.next_line() {
            if state.session().quit_requested() || conn.shutdown_token().is_cancelled() {
                // Input after QUIT is discarded.
                conn.pool().recycle(line);
                continue;
            }

            conn.touch();
            let outcome = state.process_line(line.as_slice(), &self.services).await;
            conn.pool().recycle(line);
            stats.line_processed();

            conn.enqueue_output(&outcome.reply, outcome.charset);
            if outcome.close {
                info!(conn = %conn.id(), peer = %conn.peer(), "Client quit");
                conn.close_after_flush();
            }
        }

        if conn.is_read_closed() && !conn.has_pending_lines() && !conn.is_closing() {
            debug!(conn = %conn.id(), "Input exhausted, closing after flush");
            conn.close_after_flush();
        }
    }

    async fn requeue(&self, id: ConnectionId) {
        trace!(conn = %id, worker = self.token, "Connection busy, re-queueing");
        tokio::task::yield_now().await;
        match self.requeue.try_send(id) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(id)) => {
                let requeue = self.requeue.clone();
                tokio::spawn(async move {
                    let _ = requeue.send(id).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
