//! Directory-backed secret store: `{root}/{name}.json` per secret.

use super::{SecretMetadata, SecretPayload, SecretStore};
use crate::core::error::ExternalServiceError;
use crate::core::persist::write_atomic;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Component, Path, PathBuf};

/// On-disk record.
#[derive(Debug, Serialize, Deserialize)]
struct SecretRecord {
    name: String,
    version: u64,
    values: SecretPayload,
}

impl SecretRecord {
    fn metadata(&self) -> SecretMetadata {
        SecretMetadata {
            name: self.name.clone(),
            version: self.version,
            keys: self.values.keys().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectorySecretStore {
    root: PathBuf,
}

impl DirectorySecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File holding `name`. Names are `/`-separated and may not escape the root.
    pub fn secret_path(&self, name: &str) -> io::Result<PathBuf> {
        let relative = Path::new(name);
        let plain = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("secret name '{}' is not a relative path", name),
            ));
        }
        Ok(self.root.join(format!("{}.json", name)))
    }

    fn read(&self, operation: &'static str, name: &str) -> Result<Option<SecretRecord>, ExternalServiceError> {
        let err = store_error(operation, name);
        let path = self.secret_path(name).map_err(err)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(err)?;
        let record: SecretRecord = serde_json::from_str(&content)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            .map_err(err)?;
        Ok(Some(record))
    }

    fn write(&self, operation: &'static str, record: &SecretRecord) -> Result<(), ExternalServiceError> {
        let err = store_error(operation, &record.name);
        let path = self.secret_path(&record.name).map_err(err)?;
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            .map_err(err)?;
        write_atomic(&path, json.as_bytes()).map_err(err)
    }
}

fn store_error<'a>(operation: &'static str, name: &'a str) -> impl Fn(io::Error) -> ExternalServiceError + Copy + 'a {
    move |source| ExternalServiceError::SecretStore {
        operation,
        secret: name.to_string(),
        source,
    }
}

impl SecretStore for DirectorySecretStore {
    fn describe(&self, name: &str) -> Result<Option<SecretMetadata>, ExternalServiceError> {
        Ok(self.read("describe", name)?.map(|r| r.metadata()))
    }

    fn create(&self, name: &str, payload: &SecretPayload) -> Result<SecretMetadata, ExternalServiceError> {
        if self.read("create", name)?.is_some() {
            return Err(store_error("create", name)(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "secret already exists",
            )));
        }
        let record = SecretRecord {
            name: name.to_string(),
            version: 1,
            values: payload.clone(),
        };
        self.write("create", &record)?;
        Ok(record.metadata())
    }

    fn update(&self, name: &str, payload: &SecretPayload) -> Result<SecretMetadata, ExternalServiceError> {
        let Some(existing) = self.read("update", name)? else {
            return Err(store_error("update", name)(io::Error::new(
                io::ErrorKind::NotFound,
                "secret does not exist",
            )));
        };
        let record = SecretRecord {
            name: name.to_string(),
            version: existing.version + 1,
            values: payload.clone(),
        };
        self.write("update", &record)?;
        Ok(record.metadata())
    }
}
