//! Service end of a channel: inbound requests, their responders, and the push notifier.

use crate::{
    connection::ListenerSlot,
    message::{keys, ValueSet},
    status::ResponseStatus,
};
use tokio::sync::{mpsc, oneshot};

/// Text sent when a request is dropped before its handler responded.
pub const DROPPED_REQUEST_ERROR: &str = "the update service dropped the request without responding";

/// A client connection accepted by a listener.
pub struct IncomingConnection {
    id: u64,
    requests: mpsc::Receiver<IncomingRequest>,
    notifier: Notifier,
}

impl IncomingConnection {
    pub(crate) fn new(id: u64, requests: mpsc::Receiver<IncomingRequest>, notifier: Notifier) -> Self {
        Self {
            id,
            requests,
            notifier,
        }
    }

    /// Listener-assigned identifier, unique per listener.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Handle for pushing unsolicited messages to the client.
    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Wait for the next request. `None` once the client has gone.
    pub async fn next_request(&mut self) -> Option<IncomingRequest> {
        self.requests.recv().await
    }
}

/// A request message awaiting exactly one response.
pub struct IncomingRequest {
    message: ValueSet,
    responder: Responder,
}

impl IncomingRequest {
    pub(crate) fn new(message: ValueSet, reply: oneshot::Sender<ValueSet>) -> Self {
        Self {
            message,
            responder: Responder { reply: Some(reply) },
        }
    }

    pub fn message(&self) -> &ValueSet {
        &self.message
    }

    pub fn into_parts(self) -> (ValueSet, Responder) {
        (self.message, self.responder)
    }
}

/// Sends the single response to one request.
///
/// Consumed by [`Responder::send`]. Dropping it unsent replies with
/// [`DROPPED_REQUEST_ERROR`], so every request gets exactly one response.
pub struct Responder {
    reply: Option<oneshot::Sender<ValueSet>>,
}

impl Responder {
    /// Send the response. Returns `false` if the client is no longer listening.
    pub fn send(mut self, message: ValueSet) -> bool {
        match self.reply.take() {
            Some(reply) => reply.send(message).is_ok(),
            None => false,
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(reply) = self.reply.take() {
            tracing::warn!("request dropped without a response; replying with an error");
            let mut message = ValueSet::new();
            message.insert(keys::ERROR_MESSAGE.into(), DROPPED_REQUEST_ERROR.into());
            let _ = reply.send(message);
        }
    }
}

/// Pushes unsolicited messages (progress) to the client of one connection.
#[derive(Clone)]
pub struct Notifier {
    inner: NotifierInner,
}

#[derive(Clone)]
enum NotifierInner {
    /// Queue drained by a socket connection task.
    Queue(mpsc::Sender<ValueSet>),
    /// In-process client listener.
    Listener(ListenerSlot),
}

impl Notifier {
    pub(crate) fn queue(tx: mpsc::Sender<ValueSet>) -> Self {
        Self {
            inner: NotifierInner::Queue(tx),
        }
    }

    pub(crate) fn listener(slot: ListenerSlot) -> Self {
        Self {
            inner: NotifierInner::Listener(slot),
        }
    }

    /// Push a message. Resolves once the message is queued ahead of any later response.
    pub async fn send_message(&self, message: ValueSet) -> ResponseStatus {
        let delivered = match &self.inner {
            NotifierInner::Queue(tx) => tx.send(message).await.is_ok(),
            NotifierInner::Listener(slot) => slot.deliver(message).await,
        };
        if delivered {
            ResponseStatus::Success
        } else {
            ResponseStatus::Failure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DeploymentResponse;

    #[tokio::test]
    async fn dropped_responder_replies_once_with_error() {
        let (tx, rx) = oneshot::channel();
        let request = IncomingRequest::new(ValueSet::new(), tx);
        drop(request);

        let reply = rx.await.expect("drop must produce a reply");
        assert_eq!(
            DeploymentResponse::from_message(&reply),
            DeploymentResponse::Error(DROPPED_REQUEST_ERROR.into())
        );
    }

    #[tokio::test]
    async fn explicit_response_wins_over_drop_fallback() {
        let (tx, rx) = oneshot::channel();
        let (_, responder) = IncomingRequest::new(ValueSet::new(), tx).into_parts();
        assert!(responder.send(DeploymentResponse::Success.to_message()));

        let reply = rx.await.unwrap();
        assert_eq!(DeploymentResponse::from_message(&reply), DeploymentResponse::Success);
    }

    #[tokio::test]
    async fn notifier_without_listener_reports_failure() {
        let slot = ListenerSlot::default();
        let notifier = Notifier::listener(slot.clone());
        assert_eq!(
            notifier.send_message(ValueSet::new()).await,
            ResponseStatus::Failure
        );

        let mut rx = slot.attach(4);
        assert_eq!(
            notifier.send_message(ValueSet::new()).await,
            ResponseStatus::Success
        );
        assert!(rx.recv().await.is_some());
    }
}
