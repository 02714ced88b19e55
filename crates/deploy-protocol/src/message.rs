use crate::error::{ProtocolError, Result};
use serde_json::Value;
use std::fmt;
use url::Url;

/// Associative message exchanged over a service channel.
pub type ValueSet = serde_json::Map<String, Value>;

/// Wire names of every message field and verb value.
pub mod keys {
    pub const VERB: &str = "Verb";
    pub const UPDATE_VERB: &str = "UpdateVerb";
    pub const INSTALL_VERB: &str = "InstallVerb";
    pub const REMOVE_VERB: &str = "RemoveVerb";
    pub const PACKAGE_LOCATION: &str = "PackageLocation";
    pub const REMOVE_PACKAGE_ID: &str = "RemovePackageId";
    pub const ERROR_MESSAGE: &str = "ErrorMessage";
    pub const SUCCESS: &str = "Success";
    pub const DEPLOYMENT_PROGRESS: &str = "DeploymentProgress";
}

/// Discriminant of a [`DeploymentRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Install,
    Update,
    Remove,
}

impl Verb {
    /// Value carried in the `Verb` field.
    pub fn as_wire(self) -> &'static str {
        match self {
            Verb::Install => keys::INSTALL_VERB,
            Verb::Update => keys::UPDATE_VERB,
            Verb::Remove => keys::REMOVE_VERB,
        }
    }

    /// Map a `Verb` field value back to the verb it names.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            keys::INSTALL_VERB => Some(Verb::Install),
            keys::UPDATE_VERB => Some(Verb::Update),
            keys::REMOVE_VERB => Some(Verb::Remove),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verb::Install => "install",
            Verb::Update => "update",
            Verb::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// One deployment operation. Each variant carries exactly the payload its verb needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentRequest {
    /// Install a package that is not yet present.
    Install { source: Url },
    /// Replace the installed package with the one at `source`.
    Update { source: Url },
    /// Remove an installed package by its full name.
    Remove { package_full_name: String },
}

impl DeploymentRequest {
    pub fn verb(&self) -> Verb {
        match self {
            DeploymentRequest::Install { .. } => Verb::Install,
            DeploymentRequest::Update { .. } => Verb::Update,
            DeploymentRequest::Remove { .. } => Verb::Remove,
        }
    }

    /// Encode into the channel's message format: one verb field plus one payload field.
    pub fn to_message(&self) -> ValueSet {
        let mut message = ValueSet::new();
        message.insert(keys::VERB.into(), self.verb().as_wire().into());
        match self {
            DeploymentRequest::Install { source } | DeploymentRequest::Update { source } => {
                message.insert(keys::PACKAGE_LOCATION.into(), source.as_str().into());
            }
            DeploymentRequest::Remove { package_full_name } => {
                message.insert(
                    keys::REMOVE_PACKAGE_ID.into(),
                    package_full_name.as_str().into(),
                );
            }
        }
        message
    }

    /// Decode a request message received by the service.
    pub fn from_message(message: &ValueSet) -> Result<Self> {
        let verb = required_str(message, keys::VERB)?;
        let verb = Verb::from_wire(verb).ok_or_else(|| ProtocolError::UnknownVerb(verb.into()))?;

        match verb {
            Verb::Install | Verb::Update => {
                let location = required_str(message, keys::PACKAGE_LOCATION)?;
                let source = Url::parse(location)
                    .map_err(|err| ProtocolError::invalid(keys::PACKAGE_LOCATION, err.to_string()))?;
                Ok(if verb == Verb::Install {
                    DeploymentRequest::Install { source }
                } else {
                    DeploymentRequest::Update { source }
                })
            }
            Verb::Remove => {
                let package_full_name = required_str(message, keys::REMOVE_PACKAGE_ID)?;
                Ok(DeploymentRequest::Remove {
                    package_full_name: package_full_name.to_string(),
                })
            }
        }
    }
}

fn required_str<'a>(message: &'a ValueSet, field: &'static str) -> Result<&'a str> {
    match message.get(field) {
        None | Some(Value::Null) => Err(ProtocolError::MissingField(field)),
        Some(Value::String(value)) if value.trim().is_empty() => {
            Err(ProtocolError::MissingField(field))
        }
        Some(Value::String(value)) => Ok(value.as_str()),
        Some(other) => Err(ProtocolError::invalid(
            field,
            format!("expected a string, found {other}"),
        )),
    }
}

/// Final reply to a request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentResponse {
    Success,
    Error(String),
}

impl DeploymentResponse {
    /// Build a response from the installer's error text; blank text means success.
    pub fn from_error_text(error_text: &str) -> Self {
        if error_text.trim().is_empty() {
            DeploymentResponse::Success
        } else {
            DeploymentResponse::Error(error_text.to_string())
        }
    }

    pub fn to_message(&self) -> ValueSet {
        let mut message = ValueSet::new();
        match self {
            DeploymentResponse::Success => {
                message.insert(keys::SUCCESS.into(), Value::Bool(true));
            }
            DeploymentResponse::Error(text) => {
                message.insert(keys::ERROR_MESSAGE.into(), text.as_str().into());
            }
        }
        message
    }

    /// Interpret a reply payload. The presence of an error field decides the outcome.
    pub fn from_message(message: &ValueSet) -> Self {
        match message.get(keys::ERROR_MESSAGE) {
            Some(Value::String(text)) => DeploymentResponse::Error(text.clone()),
            Some(Value::Null) | None => DeploymentResponse::Success,
            Some(other) => DeploymentResponse::Error(other.to_string()),
        }
    }
}

/// Percentage pushed by the service while a deployment runs. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgressEvent(u32);

impl ProgressEvent {
    /// Values above 100 are clamped.
    pub fn new(percentage: u32) -> Self {
        ProgressEvent(percentage.min(100))
    }

    pub fn percentage(self) -> u32 {
        self.0
    }

    pub fn to_message(self) -> ValueSet {
        let mut message = ValueSet::new();
        message.insert(keys::DEPLOYMENT_PROGRESS.into(), Value::from(self.0));
        message
    }

    /// Returns `None` for unsolicited messages that carry no usable progress value.
    pub fn from_message(message: &ValueSet) -> Option<Self> {
        let value = message.get(keys::DEPLOYMENT_PROGRESS)?.as_u64()?;
        Some(ProgressEvent::new(u32::try_from(value).unwrap_or(u32::MAX)))
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value_set(value: serde_json::Value) -> ValueSet {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn update_request_carries_verb_and_location_only() {
        let request = DeploymentRequest::Update {
            source: Url::parse("https://example.com/App.msixbundle").unwrap(),
        };
        let message = request.to_message();

        assert_eq!(message.len(), 2);
        assert_eq!(message[keys::VERB], json!("UpdateVerb"));
        assert_eq!(
            message[keys::PACKAGE_LOCATION],
            json!("https://example.com/App.msixbundle")
        );
        assert_eq!(DeploymentRequest::from_message(&message).unwrap(), request);
    }

    #[test]
    fn remove_request_uses_package_id_field() {
        let message = value_set(json!({
            "Verb": "RemoveVerb",
            "RemovePackageId": "App_1.0.0.0_x64__abc",
        }));
        let request = DeploymentRequest::from_message(&message).unwrap();
        assert_eq!(
            request,
            DeploymentRequest::Remove {
                package_full_name: "App_1.0.0.0_x64__abc".into()
            }
        );
    }

    #[test]
    fn decoding_rejects_bad_requests() {
        let missing_verb = value_set(json!({ "PackageLocation": "https://x/a" }));
        assert!(matches!(
            DeploymentRequest::from_message(&missing_verb),
            Err(ProtocolError::MissingField("Verb"))
        ));

        let unknown = value_set(json!({ "Verb": "ReinstallVerb" }));
        assert!(matches!(
            DeploymentRequest::from_message(&unknown),
            Err(ProtocolError::UnknownVerb(verb)) if verb == "ReinstallVerb"
        ));

        let remove_without_id = value_set(json!({
            "Verb": "RemoveVerb",
            "PackageLocation": "https://x/a",
        }));
        assert!(matches!(
            DeploymentRequest::from_message(&remove_without_id),
            Err(ProtocolError::MissingField("RemovePackageId"))
        ));

        let relative = value_set(json!({ "Verb": "InstallVerb", "PackageLocation": "a/b" }));
        assert!(matches!(
            DeploymentRequest::from_message(&relative),
            Err(ProtocolError::InvalidField { field: "PackageLocation", .. })
        ));

        let numeric = value_set(json!({ "Verb": 3 }));
        assert!(matches!(
            DeploymentRequest::from_message(&numeric),
            Err(ProtocolError::InvalidField { field: "Verb", .. })
        ));
    }

    #[test]
    fn response_outcome_follows_error_field() {
        let success = DeploymentResponse::from_error_text("");
        assert_eq!(success, DeploymentResponse::Success);
        assert_eq!(success.to_message()[keys::SUCCESS], json!(true));

        assert_eq!(
            DeploymentResponse::from_error_text(" \n"),
            DeploymentResponse::Success
        );

        let failed = DeploymentResponse::from_error_text("package not found");
        let message = failed.to_message();
        assert!(!message.contains_key(keys::SUCCESS));
        assert_eq!(DeploymentResponse::from_message(&message), failed);

        assert_eq!(
            DeploymentResponse::from_message(&ValueSet::new()),
            DeploymentResponse::Success
        );
    }

    #[test]
    fn progress_is_clamped_and_ignores_foreign_messages() {
        assert_eq!(ProgressEvent::new(250).percentage(), 100);

        let message = value_set(json!({ "DeploymentProgress": 45 }));
        assert_eq!(ProgressEvent::from_message(&message), Some(ProgressEvent::new(45)));

        let foreign = value_set(json!({ "DeploymentState": "Queued" }));
        assert_eq!(ProgressEvent::from_message(&foreign), None);

        let negative = value_set(json!({ "DeploymentProgress": -5 }));
        assert_eq!(ProgressEvent::from_message(&negative), None);
    }
}
