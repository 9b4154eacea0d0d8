use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::domain::Delivery;

#[derive(Clone, Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("no channel registered for delivery handle '{handle}'")]
    UnknownHandle { handle: String },
    #[error("channel for delivery handle '{handle}' is gone")]
    ChannelClosed { handle: String },
}

/// Opaque external collaborator that resolves delivery handles. Publishing
/// is fire-and-forget per job: recipient liveness is not tracked and a
/// failed delivery is not retried.
#[async_trait::async_trait]
pub trait Notifier: std::fmt::Debug + Send + Sync {
    async fn publish(&self, handle: &str, delivery: Delivery) -> Result<(), NotifyError>;
}

/// In-process notifier: each registered handle maps to an mpsc channel
/// whose receiving side is held by the client.
#[derive(Debug, Default)]
pub struct ChannelNotifier {
    channels: DashMap<String, mpsc::Sender<Delivery>>,
}

impl ChannelNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handle and hands back the receiving side. Re-registering
    /// a handle replaces the previous channel.
    pub fn register(&self, handle: impl Into<String>) -> mpsc::Receiver<Delivery> {
        let (tx, rx) = mpsc::channel(16);
        self.channels.insert(handle.into(), tx);
        rx
    }

    pub fn unregister(&self, handle: &str) {
        self.channels.remove(handle);
    }
}

#[async_trait::async_trait]
impl Notifier for ChannelNotifier {
    async fn publish(&self, handle: &str, delivery: Delivery) -> Result<(), NotifyError> {
        let tx = match self.channels.get(handle) {
            Some(entry) => entry.value().clone(),
            None => {
                return Err(NotifyError::UnknownHandle {
                    handle: handle.to_string(),
                });
            }
        };

        tx.send(delivery).await.map_err(|_| {
            // Receiver dropped: the client disconnected after enqueue.
            self.channels.remove(handle);
            NotifyError::ChannelClosed {
                handle: handle.to_string(),
            }
        })
    }
}
