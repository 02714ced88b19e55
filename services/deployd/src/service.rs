use crate::{
    error::{Result, ServiceError},
    installer::{select_volume, DeployMode, DeploymentOutcome, PackageInstaller},
};
use deploy_protocol::{
    DeploymentRequest, DeploymentResponse, IncomingRequest, Notifier, ProgressEvent,
    ResponseStatus, ValueSet,
};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

const PROGRESS_BUFFER: usize = 16;
const PROGRESS_SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Answers deployment requests by driving a [`PackageInstaller`].
///
/// Every request gets exactly one response. Decode failures, installer errors
/// and panics in the handler all become error responses.
pub struct DeploymentService<I> {
    installer: Arc<I>,
}

impl<I> Clone for DeploymentService<I> {
    fn clone(&self) -> Self {
        Self {
            installer: Arc::clone(&self.installer),
        }
    }
}

impl<I> DeploymentService<I>
where
    I: PackageInstaller + 'static,
{
    pub fn new(installer: I) -> Self {
        Self {
            installer: Arc::new(installer),
        }
    }

    /// Handle one request and send its response.
    ///
    /// Progress is pushed through `notifier` before the response. Returns
    /// whether the response reached the client.
    pub async fn handle_request(&self, request: IncomingRequest, notifier: &Notifier) -> bool {
        let (message, responder) = request.into_parts();
        let outcome = AssertUnwindSafe(self.dispatch(&message, notifier))
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(Ok(())) => DeploymentResponse::Success,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "deployment request failed");
                DeploymentResponse::Error(err.to_string())
            }
            Err(panic) => {
                let err = ServiceError::Panicked(panic_message(panic.as_ref()));
                tracing::error!(error = %err, "deployment request handler panicked");
                DeploymentResponse::Error(err.to_string())
            }
        };

        let delivered = responder.send(response.to_message());
        if !delivered {
            tracing::debug!("client went away before the response was sent");
        }
        delivered
    }

    async fn dispatch(&self, message: &ValueSet, notifier: &Notifier) -> Result<()> {
        let request = DeploymentRequest::from_message(message)?;
        tracing::info!(verb = %request.verb(), "handling deployment request");

        let outcome = match &request {
            DeploymentRequest::Install { source } => {
                self.deploy(DeployMode::Install, source, notifier).await?
            }
            DeploymentRequest::Update { source } => {
                self.deploy(DeployMode::Update, source, notifier).await?
            }
            DeploymentRequest::Remove { package_full_name } => {
                self.installer.remove(package_full_name).await?
            }
        };
        outcome.into_result()
    }

    async fn deploy(
        &self,
        mode: DeployMode,
        source: &Url,
        notifier: &Notifier,
    ) -> Result<DeploymentOutcome> {
        let volumes = self.installer.volumes();
        let volume = select_volume(&volumes).ok_or(ServiceError::VolumeUnavailable)?;
        tracing::debug!(volume = %volume.name, %source, "deploying package");

        let (progress_tx, mut progress_rx) = mpsc::channel::<u32>(PROGRESS_BUFFER);
        let forward_to = notifier.clone();
        let forwarder = tokio::spawn(async move {
            let mut stalled = false;
            while let Some(percentage) = progress_rx.recv().await {
                if stalled {
                    continue;
                }
                let message = ProgressEvent::new(percentage).to_message();
                match tokio::time::timeout(PROGRESS_SEND_TIMEOUT, forward_to.send_message(message))
                    .await
                {
                    Ok(ResponseStatus::Success) => {}
                    Ok(status) => tracing::debug!(percentage, %status, "progress not delivered"),
                    Err(_) => {
                        tracing::debug!(percentage, "client is not reading progress; dropping the rest");
                        stalled = true;
                    }
                }
            }
        });

        let outcome = self.installer.deploy(mode, source, volume, progress_tx).await;
        // All progress is queued before the response goes out.
        let _ = forwarder.await;
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
