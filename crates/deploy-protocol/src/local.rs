//! In-process transport: endpoints registered by name on a shared broker.

use crate::{
    connection::{ListenerSlot, ServiceConnection, ServiceConnector, ServiceResponse},
    message::ValueSet,
    server::{IncomingConnection, IncomingRequest, Notifier},
    status::{ConnectionStatus, ResponseStatus},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

const REQUEST_BACKLOG: usize = 8;

struct Registration {
    id: u64,
    connections: mpsc::Sender<IncomingConnection>,
}

#[derive(Default)]
struct BrokerState {
    endpoints: Mutex<HashMap<String, Registration>>,
    next_registration: AtomicU64,
    next_connection: AtomicU64,
}

/// Routes connections to endpoints registered in the same process.
#[derive(Clone, Default)]
pub struct LocalBroker {
    state: Arc<BrokerState>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint. A previous registration under the same name is replaced.
    pub fn register(&self, service_name: &str, backlog: usize) -> LocalEndpoint {
        let (tx, rx) = mpsc::channel(backlog.max(1));
        let id = self.state.next_registration.fetch_add(1, Ordering::Relaxed);
        self.endpoints().insert(
            service_name.to_string(),
            Registration {
                id,
                connections: tx,
            },
        );
        tracing::debug!(service = service_name, "registered local endpoint");
        LocalEndpoint {
            service_name: service_name.to_string(),
            registration: id,
            connections: rx,
            broker: self.clone(),
        }
    }

    /// Connector that opens channels through this broker.
    pub fn connector(&self) -> LocalConnector {
        LocalConnector {
            broker: self.clone(),
        }
    }

    fn endpoints(&self) -> std::sync::MutexGuard<'_, HashMap<String, Registration>> {
        self.state
            .endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Accepting side of a registered endpoint. Unregisters itself on drop.
pub struct LocalEndpoint {
    service_name: String,
    registration: u64,
    connections: mpsc::Receiver<IncomingConnection>,
    broker: LocalBroker,
}

impl LocalEndpoint {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> Option<IncomingConnection> {
        self.connections.recv().await
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        let mut endpoints = self.broker.endpoints();
        let ours = endpoints
            .get(&self.service_name)
            .is_some_and(|registered| registered.id == self.registration);
        if ours {
            endpoints.remove(&self.service_name);
        }
    }
}

/// [`ServiceConnector`] backed by a [`LocalBroker`].
#[derive(Clone)]
pub struct LocalConnector {
    broker: LocalBroker,
}

#[async_trait]
impl ServiceConnector for LocalConnector {
    async fn open(
        &self,
        service_name: &str,
    ) -> Result<Box<dyn ServiceConnection>, ConnectionStatus> {
        let endpoint = self
            .broker
            .endpoints()
            .get(service_name)
            .map(|registered| registered.connections.clone())
            .ok_or(ConnectionStatus::ServiceNotFound)?;

        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_BACKLOG);
        let listener = ListenerSlot::default();
        let id = self
            .broker
            .state
            .next_connection
            .fetch_add(1, Ordering::Relaxed);
        let incoming = IncomingConnection::new(id, requests_rx, Notifier::listener(listener.clone()));

        endpoint
            .send(incoming)
            .await
            .map_err(|_| ConnectionStatus::ServiceUnavailable)?;

        Ok(Box::new(LocalConnection {
            requests: Some(requests_tx),
            listener,
        }))
    }
}

struct LocalConnection {
    requests: Option<mpsc::Sender<IncomingRequest>>,
    listener: ListenerSlot,
}

#[async_trait]
impl ServiceConnection for LocalConnection {
    fn subscribe(&mut self, buffer: usize) -> mpsc::Receiver<ValueSet> {
        self.listener.attach(buffer)
    }

    fn unsubscribe(&mut self) {
        self.listener.detach();
    }

    async fn send_message(&mut self, message: ValueSet) -> ServiceResponse {
        let Some(requests) = self.requests.as_ref() else {
            return ServiceResponse::status(ResponseStatus::Unknown);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if requests
            .send(IncomingRequest::new(message, reply_tx))
            .await
            .is_err()
        {
            return ServiceResponse::status(ResponseStatus::RemoteSystemUnavailable);
        }

        match reply_rx.await {
            Ok(reply) => ServiceResponse::success(reply),
            Err(_) => ServiceResponse::status(ResponseStatus::Failure),
        }
    }

    fn close(&mut self) {
        self.requests = None;
        self.listener.detach();
    }
}
