use crate::{
    checker::UpdateInfo,
    config::ClientConfig,
    error::{Result, UpdaterError},
};
use deploy_protocol::{
    DeploymentRequest, DeploymentResponse, ProgressEvent, ResponseStatus, ServiceConnection,
    ServiceConnector, ServiceResponse, ValueSet,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const UNSPECIFIED_SERVICE_ERROR: &str = "the update service reported an error without a message";

/// Outcome of a deployment request. There is no partial success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentResult {
    /// The service completed the request.
    Succeeded,
    /// The request was refused, failed or never reached the service.
    Failed(UpdaterError),
}

impl DeploymentResult {
    pub fn succeeded(&self) -> bool {
        matches!(self, DeploymentResult::Succeeded)
    }

    pub fn error(&self) -> Option<&UpdaterError> {
        match self {
            DeploymentResult::Succeeded => None,
            DeploymentResult::Failed(err) => Some(err),
        }
    }

    /// Non-empty diagnostic for failed deployments.
    pub fn error_message(&self) -> Option<String> {
        self.error().map(ToString::to_string)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            DeploymentResult::Succeeded => Ok(()),
            DeploymentResult::Failed(err) => Err(err),
        }
    }
}

impl From<Result<()>> for DeploymentResult {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => DeploymentResult::Succeeded,
            Err(err) => DeploymentResult::Failed(err),
        }
    }
}

/// Sends deployment requests to the privileged update service.
///
/// Each request opens its own channel, attaches a progress listener, sends one
/// message and waits for the reply. The channel is torn down when the request
/// finishes, whichever way it finishes.
pub struct DeploymentClient<C> {
    connector: Arc<C>,
    config: ClientConfig,
}

impl<C> Clone for DeploymentClient<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
        }
    }
}

impl<C> DeploymentClient<C>
where
    C: ServiceConnector + 'static,
{
    /// Create a client that opens channels through `connector`.
    pub fn new(connector: C, config: ClientConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Replace the installed package with the one described by `info`.
    ///
    /// Rejected with [`UpdaterError::AlreadyUpToDate`], without contacting the
    /// service, when `info` does not call for an update.
    pub async fn update<P>(
        &self,
        info: &UpdateInfo,
        on_progress: P,
        cancel: &CancellationToken,
    ) -> DeploymentResult
    where
        P: FnMut(ProgressEvent) + Send,
    {
        if !info.should_update() {
            return DeploymentResult::Failed(UpdaterError::AlreadyUpToDate);
        }
        let request = DeploymentRequest::Update {
            source: info.descriptor().download_url().clone(),
        };
        self.execute(request, on_progress, cancel).await
    }

    /// Install the package described by `info`. Same guard as [`Self::update`].
    pub async fn install<P>(
        &self,
        info: &UpdateInfo,
        on_progress: P,
        cancel: &CancellationToken,
    ) -> DeploymentResult
    where
        P: FnMut(ProgressEvent) + Send,
    {
        if !info.should_update() {
            return DeploymentResult::Failed(UpdaterError::AlreadyUpToDate);
        }
        let request = DeploymentRequest::Install {
            source: info.descriptor().download_url().clone(),
        };
        self.execute(request, on_progress, cancel).await
    }

    /// Remove the package identified by `package_full_name`.
    pub async fn remove(&self, package_full_name: &str, cancel: &CancellationToken) -> DeploymentResult {
        let request = DeploymentRequest::Remove {
            package_full_name: package_full_name.to_string(),
        };
        self.execute(request, |_| {}, cancel).await
    }

    /// Send `request` and wait for its outcome, forwarding progress to `on_progress`.
    pub async fn execute<P>(
        &self,
        request: DeploymentRequest,
        mut on_progress: P,
        cancel: &CancellationToken,
    ) -> DeploymentResult
    where
        P: FnMut(ProgressEvent) + Send,
    {
        let verb = request.verb();
        let result = self.run(request, &mut on_progress, cancel).await;
        match &result {
            Ok(()) => tracing::info!(%verb, "deployment request completed"),
            Err(err) => tracing::warn!(%verb, error = %err, "deployment request failed"),
        }
        result.into()
    }

    /// Run `request` on a background task. Progress arrives on the returned
    /// task's channel, which closes when the request completes.
    ///
    /// A consumer that falls behind may miss intermediate values but always
    /// receives the most recent one before the channel closes.
    pub fn spawn(&self, request: DeploymentRequest, cancel: CancellationToken) -> DeploymentTask {
        let (tx, rx) = mpsc::channel(self.config.progress_buffer.max(1));
        let client = self.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            // With the buffer full, hold the newest value back instead of blocking the
            // request; older held values are superseded.
            let mut held: Option<ProgressEvent> = None;
            let on_progress = |event: ProgressEvent| match tx.try_send(event) {
                Ok(()) => held = None,
                Err(TrySendError::Full(event)) => held = Some(event),
                Err(TrySendError::Closed(_)) => {}
            };
            let result = client.execute(request, on_progress, &task_cancel).await;
            if let Some(last) = held {
                let _ = tx.send(last).await;
            }
            result
        });

        DeploymentTask {
            progress: rx,
            cancel,
            handle,
        }
    }

    async fn run<P>(
        &self,
        request: DeploymentRequest,
        on_progress: &mut P,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        P: FnMut(ProgressEvent) + Send,
    {
        let service = self.config.service_name.as_str();
        let verb = request.verb();

        if cancel.is_cancelled() {
            return Err(UpdaterError::Cancelled);
        }

        let connection = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpdaterError::Cancelled),
            opened = self.connector.open(service) => opened.map_err(|status| {
                tracing::warn!(service, %status, "could not open update service channel");
                UpdaterError::TransportUnavailable(status)
            })?,
        };
        let mut channel = OpenChannel::attach(connection, self.config.progress_buffer);

        if cancel.is_cancelled() {
            return Err(UpdaterError::Cancelled);
        }

        tracing::debug!(service, %verb, "sending deployment request");
        let mut cancelled = false;
        let response = {
            let OpenChannel {
                connection,
                progress,
            } = &mut channel;
            let mut send = connection.send_message(request.to_message());
            loop {
                tokio::select! {
                    biased;
                    Some(message) = progress.recv() => {
                        if !cancelled {
                            forward_progress(&message, on_progress);
                        }
                    }
                    response = &mut send => break response,
                    _ = cancel.cancelled(), if !cancelled => {
                        // A sent request cannot be recalled; let it finish and drop the reply.
                        tracing::info!(%verb, "cancellation requested after the request was sent");
                        cancelled = true;
                    }
                }
            }
        };

        if cancelled {
            return Err(UpdaterError::Cancelled);
        }
        while let Ok(message) = channel.progress.try_recv() {
            forward_progress(&message, on_progress);
        }
        interpret_response(response)
    }
}

/// A live channel plus its attached progress listener.
///
/// Dropping it detaches the listener and closes the channel, exactly once, on
/// every exit path including cancellation of the owning future.
struct OpenChannel {
    connection: Box<dyn ServiceConnection>,
    progress: mpsc::Receiver<ValueSet>,
}

impl OpenChannel {
    /// Attaches the listener before anything is sent, so no progress is missed.
    fn attach(mut connection: Box<dyn ServiceConnection>, buffer: usize) -> Self {
        let progress = connection.subscribe(buffer);
        Self {
            connection,
            progress,
        }
    }
}

impl Drop for OpenChannel {
    fn drop(&mut self) {
        self.connection.unsubscribe();
        self.connection.close();
        tracing::debug!("closed update service channel");
    }
}

fn forward_progress<P>(message: &ValueSet, on_progress: &mut P)
where
    P: FnMut(ProgressEvent),
{
    match ProgressEvent::from_message(message) {
        Some(event) => {
            tracing::trace!(progress = event.percentage(), "deployment progress");
            on_progress(event);
        }
        None => tracing::debug!("ignoring unsolicited message without progress"),
    }
}

fn interpret_response(response: ServiceResponse) -> Result<()> {
    match response.status {
        ResponseStatus::Success => match DeploymentResponse::from_message(&response.message) {
            DeploymentResponse::Success => Ok(()),
            DeploymentResponse::Error(text) if text.trim().is_empty() => {
                Err(UpdaterError::InstallerFailed(UNSPECIFIED_SERVICE_ERROR.into()))
            }
            DeploymentResponse::Error(text) => Err(UpdaterError::InstallerFailed(text)),
        },
        // A completed update or install terminates this process, taking the
        // channel down before the reply can be read. A broken channel after
        // sending is therefore reported as success. This cannot distinguish
        // that case from a service that failed after accepting the request.
        ResponseStatus::Failure => {
            tracing::info!("update service channel failed after the request was sent; treating as completed");
            Ok(())
        }
        status => Err(UpdaterError::UnexpectedServiceStatus(status)),
    }
}

/// A deployment running on a background task.
pub struct DeploymentTask {
    progress: mpsc::Receiver<ProgressEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<DeploymentResult>,
}

impl DeploymentTask {
    /// Next progress value. `None` once the request has completed.
    pub async fn next_progress(&mut self) -> Option<ProgressEvent> {
        self.progress.recv().await
    }

    /// Request cancellation. The outcome reports [`UpdaterError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the final outcome. Progress not yet read is discarded.
    pub async fn result(self) -> DeploymentResult {
        let DeploymentTask {
            mut progress,
            handle,
            ..
        } = self;
        // The task may be waiting to hand over its last value.
        progress.close();
        match handle.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => DeploymentResult::Failed(UpdaterError::Cancelled),
            Err(err) => DeploymentResult::Failed(UpdaterError::Other(format!(
                "deployment task failed: {err}"
            ))),
        }
    }
}
