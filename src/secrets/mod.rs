//! Stage secret store: one JSON object of string values per stage, kept
//! under the profile's `secrets_name`.
//!
//! Uploads are idempotent: create when absent, update otherwise. Nothing is
//! retried.

pub mod directory;

pub use directory::DirectorySecretStore;

use crate::core::error::{Error, ExternalServiceError};
use crate::core::types::StageProfile;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Key -> value pairs stored under one secret name.
pub type SecretPayload = IndexMap<String, String>;

/// What the store reports about an existing secret. Never includes values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub name: String,
    /// Incremented on every write
    pub version: u64,
    pub keys: Vec<String>,
}

/// A named secret store.
pub trait SecretStore {
    /// Metadata for `name`, or `None` when it does not exist.
    fn describe(&self, name: &str) -> Result<Option<SecretMetadata>, ExternalServiceError>;

    /// Create `name`. Fails if it already exists.
    fn create(&self, name: &str, payload: &SecretPayload) -> Result<SecretMetadata, ExternalServiceError>;

    /// Replace the value of an existing `name`.
    fn update(&self, name: &str, payload: &SecretPayload) -> Result<SecretMetadata, ExternalServiceError>;
}

/// Whether an upload created the secret or replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadAction {
    Created,
    Updated,
}

/// Result of [`upload_secrets`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub action: UploadAction,
    pub metadata: SecretMetadata,
    /// Keys some service reads that the payload did not provide
    pub missing: Vec<String>,
}

/// Parse a JSON payload: an object whose values are all strings.
pub fn parse_payload(json: &str) -> Result<SecretPayload, Error> {
    Ok(serde_json::from_str(json)?)
}

/// Keys every service of the profile reads from the stage secret store.
pub fn required_keys(profile: &StageProfile) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for svc in profile.settings.services.values() {
        for key in &svc.secrets {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

/// Store `payload` under the profile's secret name.
pub fn upload_secrets(
    store: &dyn SecretStore,
    profile: &StageProfile,
    payload: &SecretPayload,
) -> Result<UploadOutcome, Error> {
    let name = profile.secrets_name.as_str();
    let missing: Vec<String> = required_keys(profile)
        .into_iter()
        .filter(|k| !payload.contains_key(k))
        .collect();
    for key in &missing {
        tracing::warn!(secret = name, key = %key, "payload does not provide a key a service reads");
    }

    let (action, metadata) = match store.describe(name)? {
        None => (UploadAction::Created, store.create(name, payload)?),
        Some(_) => (UploadAction::Updated, store.update(name, payload)?),
    };
    tracing::info!(secret = name, version = metadata.version, ?action, "secrets uploaded");
    Ok(UploadOutcome {
        action,
        metadata,
        missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stages::StageConfigTable;
    use crate::core::types::StageId;
    use std::cell::RefCell;

    fn profile() -> StageProfile {
        StageConfigTable::builtin()
            .resolve(&StageId::parse("staging").unwrap(), "acme")
            .unwrap()
    }

    /// Records calls so the create/update decision can be checked.
    #[derive(Default)]
    struct RecordingStore {
        existing: Option<SecretMetadata>,
        calls: RefCell<Vec<&'static str>>,
    }

    impl SecretStore for RecordingStore {
        fn describe(&self, _name: &str) -> Result<Option<SecretMetadata>, ExternalServiceError> {
            self.calls.borrow_mut().push("describe");
            Ok(self.existing.clone())
        }

        fn create(&self, name: &str, payload: &SecretPayload) -> Result<SecretMetadata, ExternalServiceError> {
            self.calls.borrow_mut().push("create");
            Ok(SecretMetadata {
                name: name.to_string(),
                version: 1,
                keys: payload.keys().cloned().collect(),
            })
        }

        fn update(&self, name: &str, payload: &SecretPayload) -> Result<SecretMetadata, ExternalServiceError> {
            self.calls.borrow_mut().push("update");
            Ok(SecretMetadata {
                name: name.to_string(),
                version: 2,
                keys: payload.keys().cloned().collect(),
            })
        }
    }

    #[test]
    fn test_secrets_parse_payload() {
        let payload = parse_payload(r#"{"JWT_SECRET": "s3cret", "API_KEY": "k"}"#).unwrap();
        assert_eq!(payload.keys().collect::<Vec<_>>(), vec!["JWT_SECRET", "API_KEY"]);
        assert!(matches!(parse_payload(r#"{"N": 1}"#), Err(Error::Json(_))));
        assert!(matches!(parse_payload("[]"), Err(Error::Json(_))));
    }

    #[test]
    fn test_secrets_required_keys() {
        assert_eq!(required_keys(&profile()), vec!["JWT_SECRET"]);
    }

    #[test]
    fn test_secrets_upload_creates_when_absent() {
        let store = RecordingStore::default();
        let payload = parse_payload(r#"{"JWT_SECRET": "s3cret"}"#).unwrap();
        let outcome = upload_secrets(&store, &profile(), &payload).unwrap();
        assert_eq!(outcome.action, UploadAction::Created);
        assert_eq!(outcome.metadata.name, "acme/staging/Secrets");
        assert!(outcome.missing.is_empty());
        assert_eq!(*store.calls.borrow(), vec!["describe", "create"]);
    }

    #[test]
    fn test_secrets_upload_updates_when_present() {
        let store = RecordingStore {
            existing: Some(SecretMetadata {
                name: "acme/staging/Secrets".to_string(),
                version: 1,
                keys: vec![],
            }),
            ..Default::default()
        };
        let outcome = upload_secrets(&store, &profile(), &SecretPayload::new()).unwrap();
        assert_eq!(outcome.action, UploadAction::Updated);
        assert_eq!(outcome.missing, vec!["JWT_SECRET"]);
        assert_eq!(*store.calls.borrow(), vec!["describe", "update"]);
    }
}
