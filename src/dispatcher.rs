//! Fan-in of channel messages to per-user workers.
//!
//! Each sender gets a mailbox drained by its own task, so one user's
//! messages are answered in arrival order while different users proceed in
//! parallel. A worker that stays idle retires and its mailbox is removed; the
//! next message from that user opens a fresh one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::channels::{ChannelManager, IncomingMessage, MessageKind, MessageStream, StatusUpdate};
use crate::router::SessionRouter;

/// How long a worker waits for its next message before retiring.
pub const DEFAULT_IDLE_AFTER: Duration = Duration::from_secs(300);

pub struct Dispatcher {
    router: Arc<SessionRouter>,
    channels: Arc<ChannelManager>,
    /// Sends happen only while this lock is held, and a worker removes its
    /// own entry under it, so nothing is queued to a retiring worker.
    mailboxes: Mutex<HashMap<String, mpsc::UnboundedSender<IncomingMessage>>>,
    idle_after: Duration,
}

impl Dispatcher {
    pub fn new(
        router: Arc<SessionRouter>,
        channels: Arc<ChannelManager>,
        idle_after: Duration,
    ) -> Self {
        Self {
            router,
            channels,
            mailboxes: Mutex::new(HashMap::new()),
            idle_after,
        }
    }

    /// Consume `stream` until it ends or Ctrl+C is pressed.
    pub async fn run(self: Arc<Self>, mut stream: MessageStream) {
        info!("Dispatcher ready and listening");
        loop {
            let message = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C received, shutting down...");
                    break;
                }
                msg = stream.next() => match msg {
                    Some(m) => m,
                    None => {
                        info!("All channel streams ended, shutting down...");
                        break;
                    }
                }
            };
            self.dispatch(message).await;
        }
    }

    /// Queue a message for its sender's worker, starting one if needed.
    pub async fn dispatch(self: &Arc<Self>, msg: IncomingMessage) {
        let key = msg.sender_key();
        let mut mailboxes = self.mailboxes.lock().await;

        let msg = match mailboxes.get(&key) {
            Some(tx) => match tx.send(msg) {
                Ok(()) => return,
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(msg);
        mailboxes.insert(key.clone(), tx);
        drop(mailboxes);

        debug!(sender = %key, "Mailbox opened");
        let this = Arc::clone(self);
        tokio::spawn(async move { this.drain(key, rx).await });
    }

    /// Number of senders with a live worker.
    pub async fn active_workers(&self) -> usize {
        self.mailboxes.lock().await.len()
    }

    async fn drain(&self, key: String, mut rx: mpsc::UnboundedReceiver<IncomingMessage>) {
        loop {
            let msg = match tokio::time::timeout(self.idle_after, rx.recv()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(_) => {
                    let mut mailboxes = self.mailboxes.lock().await;
                    match rx.try_recv() {
                        Ok(msg) => msg,
                        Err(_) => {
                            mailboxes.remove(&key);
                            debug!(sender = %key, "Mailbox retired");
                            break;
                        }
                    }
                }
            };
            self.process(msg).await;
        }
    }

    async fn process(&self, msg: IncomingMessage) {
        if msg.kind == MessageKind::Text {
            let _ = self
                .channels
                .send_status(
                    &msg.channel,
                    StatusUpdate::Thinking("Typing...".into()),
                    &msg.metadata,
                )
                .await;
        }

        let response = self.router.handle(msg.to_event()).await;
        debug!(sender = %msg.sender_key(), kind = ?response.kind, "Reply ready");

        if let Err(e) = self.channels.respond(&msg, response.into()).await {
            warn!(channel = %msg.channel, error = %e, "Failed to deliver reply");
        }
    }
}
