//! Accept loop, per-connection tasks and graceful shutdown.

use crate::{error::Result, installer::PackageInstaller, service::DeploymentService};
use async_trait::async_trait;
use deploy_protocol::{IncomingConnection, LocalEndpoint, SocketListener};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Somewhere client connections come from.
#[async_trait]
pub trait ConnectionSource: Send {
    /// Next connection. `None` once the source is closed for good.
    async fn next_connection(&mut self) -> Option<Result<IncomingConnection>>;
}

#[async_trait]
impl ConnectionSource for SocketListener {
    async fn next_connection(&mut self) -> Option<Result<IncomingConnection>> {
        Some(self.accept().await.map_err(Into::into))
    }
}

#[async_trait]
impl ConnectionSource for LocalEndpoint {
    async fn next_connection(&mut self) -> Option<Result<IncomingConnection>> {
        self.accept().await.map(Ok)
    }
}

/// Outstanding work the host waits for before it stops.
///
/// Completes when dropped or when [`Deferral::complete`] is called.
pub struct Deferral {
    _done: mpsc::Sender<()>,
}

impl Deferral {
    fn new(tracker: &mpsc::Sender<()>) -> Self {
        Self {
            _done: tracker.clone(),
        }
    }

    pub fn complete(self) {
        drop(self);
    }
}

/// Runs a [`DeploymentService`] against a connection source.
pub struct ServiceHost<I> {
    service: DeploymentService<I>,
    shutdown: CancellationToken,
}

impl<I> ServiceHost<I>
where
    I: PackageInstaller + 'static,
{
    pub fn new(service: DeploymentService<I>, shutdown: CancellationToken) -> Self {
        Self { service, shutdown }
    }

    /// Token that stops the host when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve connections until shutdown is requested or `source` closes.
    ///
    /// On shutdown no new connections or requests are taken, and the call
    /// returns once every request already being handled has been answered.
    pub async fn run<S>(self, mut source: S)
    where
        S: ConnectionSource,
    {
        let (tracker, mut completed) = mpsc::channel::<()>(1);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = source.next_connection() => next,
            };
            match next {
                Some(Ok(connection)) => {
                    tracing::debug!(connection = connection.id(), "client connected");
                    let deferral = Deferral::new(&tracker);
                    tokio::spawn(serve_connection(
                        self.service.clone(),
                        connection,
                        self.shutdown.clone(),
                        tracker.clone(),
                        deferral,
                    ));
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
                None => {
                    tracing::info!("connection source closed");
                    break;
                }
            }
        }

        drop(source);
        drop(tracker);
        tracing::info!("waiting for outstanding requests");
        // Resolves once every deferral has been dropped.
        let _ = completed.recv().await;
        tracing::info!("deployment service stopped");
    }
}

async fn serve_connection<I>(
    service: DeploymentService<I>,
    mut connection: IncomingConnection,
    shutdown: CancellationToken,
    tracker: mpsc::Sender<()>,
    deferral: Deferral,
) where
    I: PackageInstaller + 'static,
{
    let id = connection.id();
    let notifier = connection.notifier();
    let mut requests = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(_) = requests.join_next() => {}
            request = connection.next_request() => {
                let Some(request) = request else { break };
                let request_deferral = Deferral::new(&tracker);
                let service = service.clone();
                let notifier = notifier.clone();
                requests.spawn(async move {
                    service.handle_request(request, &notifier).await;
                    request_deferral.complete();
                });
            }
        }
    }

    // Responses travel over the connection, so keep it open until they are sent.
    while requests.join_next().await.is_some() {}
    drop(connection);
    tracing::debug!(connection = id, "connection finished");
    deferral.complete();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::{DeployMode, DeploymentOutcome, PackageVolume};
    use deploy_protocol::{
        DeploymentRequest, DeploymentResponse, LocalBroker, ServiceConnector, ServiceConnection,
    };
    use std::sync::Arc;
    use tokio::sync::Notify;
    use url::Url;

    struct GatedInstaller {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl PackageInstaller for GatedInstaller {
        fn volumes(&self) -> Vec<PackageVolume> {
            Vec::new()
        }

        async fn deploy(
            &self,
            _mode: DeployMode,
            _source: &Url,
            _volume: &PackageVolume,
            _progress: mpsc::Sender<u32>,
        ) -> Result<DeploymentOutcome> {
            Ok(DeploymentOutcome::success())
        }

        async fn remove(&self, _package_full_name: &str) -> Result<DeploymentOutcome> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(DeploymentOutcome::success())
        }
    }

    #[tokio::test]
    async fn shutdown_waits_for_requests_in_flight() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let installer = GatedInstaller {
            started: started.clone(),
            release: release.clone(),
        };

        let broker = LocalBroker::new();
        let endpoint = broker.register("svc", 4);
        let host = ServiceHost::new(DeploymentService::new(installer), CancellationToken::new());
        let shutdown = host.shutdown_token();
        let running = tokio::spawn(host.run(endpoint));

        let mut connection = broker.connector().open("svc").await.unwrap();
        let client = tokio::spawn(async move {
            let request = DeploymentRequest::Remove {
                package_full_name: "App".into(),
            };
            let response = connection.send_message(request.to_message()).await;
            connection.close();
            response
        });

        started.notified().await;
        shutdown.cancel();
        tokio::task::yield_now().await;
        assert!(!running.is_finished());

        release.notify_one();
        running.await.unwrap();
        let response = client.await.unwrap();
        assert_eq!(
            DeploymentResponse::from_message(&response.message),
            DeploymentResponse::Success
        );
    }

    #[tokio::test]
    async fn closed_source_stops_the_host() {
        let broker = LocalBroker::new();
        let endpoint = broker.register("svc", 1);
        let installer = GatedInstaller {
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        let host = ServiceHost::new(DeploymentService::new(installer), CancellationToken::new());

        // Replacing the registration closes the first endpoint's queue.
        let _replacement = broker.register("svc", 1);
        host.run(endpoint).await;
    }
}
