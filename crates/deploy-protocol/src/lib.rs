//! Control protocol spoken between an application that wants to update itself
//! and the privileged service that performs the deployment on its behalf.
//!
//! A request names one verb (install, update, remove) and its payload. While
//! the service works it may push progress messages over the same channel, and
//! it always finishes with exactly one response.
//!
//! ```ignore
//! use deploy_protocol::{DeploymentRequest, LocalBroker, ServiceConnector};
//!
//! # async fn demo() {
//! let broker = LocalBroker::new();
//! let mut endpoint = broker.register("autoupdate.deployment", 4);
//! let mut connection = broker.connector().open("autoupdate.deployment").await.unwrap();
//! let request = DeploymentRequest::Remove { package_full_name: "App_1.0.0.0".into() };
//! let response = connection.send_message(request.to_message()).await;
//! # }
//! ```

mod connection;
mod error;
mod local;
mod message;
mod server;
mod socket;
mod status;

pub use connection::{ServiceConnection, ServiceConnector, ServiceResponse};
pub use error::{ProtocolError, Result};
pub use local::{LocalBroker, LocalConnector, LocalEndpoint};
pub use message::{keys, DeploymentRequest, DeploymentResponse, ProgressEvent, ValueSet, Verb};
pub use server::{IncomingConnection, IncomingRequest, Notifier, Responder, DROPPED_REQUEST_ERROR};
pub use socket::{
    default_socket_dir, socket_path, SocketConnector, SocketListener, DEFAULT_SERVICE_NAME,
    MAX_FRAME_LENGTH,
};
pub use status::{ConnectionStatus, ResponseStatus};
