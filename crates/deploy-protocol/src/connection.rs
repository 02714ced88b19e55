use crate::{
    message::ValueSet,
    status::{ConnectionStatus, ResponseStatus},
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Reply to a message sent with [`ServiceConnection::send_message`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    pub status: ResponseStatus,
    /// Empty unless `status` is [`ResponseStatus::Success`].
    pub message: ValueSet,
}

impl ServiceResponse {
    pub fn success(message: ValueSet) -> Self {
        Self {
            status: ResponseStatus::Success,
            message,
        }
    }

    /// A reply that carries only a transport status.
    pub fn status(status: ResponseStatus) -> Self {
        Self {
            status,
            message: ValueSet::new(),
        }
    }
}

/// Opens channels to named service endpoints.
#[async_trait]
pub trait ServiceConnector: Send + Sync {
    /// Open a channel to the endpoint registered as `service_name`.
    async fn open(
        &self,
        service_name: &str,
    ) -> Result<Box<dyn ServiceConnection>, ConnectionStatus>;
}

/// Client end of an open service channel.
#[async_trait]
pub trait ServiceConnection: Send {
    /// Attach a listener for messages the service pushes outside of a reply.
    ///
    /// Messages pushed while no listener is attached are dropped.
    fn subscribe(&mut self, buffer: usize) -> mpsc::Receiver<ValueSet>;

    /// Detach the listener attached by [`ServiceConnection::subscribe`].
    fn unsubscribe(&mut self);

    /// Send a request and wait for its reply.
    async fn send_message(&mut self, message: ValueSet) -> ServiceResponse;

    /// Close the channel. Further sends report a non-success status.
    fn close(&mut self);
}

/// Shared slot holding the currently attached push listener, if any.
#[derive(Clone, Default)]
pub(crate) struct ListenerSlot(Arc<Mutex<Option<mpsc::Sender<ValueSet>>>>);

impl ListenerSlot {
    pub(crate) fn attach(&self, buffer: usize) -> mpsc::Receiver<ValueSet> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        *self.lock() = Some(tx);
        rx
    }

    pub(crate) fn detach(&self) {
        self.lock().take();
    }

    /// Deliver to the attached listener. Returns `false` when nobody received it.
    pub(crate) async fn deliver(&self, message: ValueSet) -> bool {
        let listener = self.lock().clone();
        match listener {
            Some(tx) => tx.send(message).await.is_ok(),
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<ValueSet>>> {
        // The slot holds no invariant a panicking holder could break.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
