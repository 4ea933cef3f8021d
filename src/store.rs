use crate::errors::AppError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

/// Logical collection keys. One file per key so that a corrupt
/// collection never prevents the others from loading.
pub mod keys {
    pub const CLIENTS: &str = "clients";
    pub const CERTIFICATES: &str = "certificates";
    pub const HISTORY: &str = "history";
    pub const SCHEDULES: &str = "schedules";
    pub const BACKEND_CONFIG: &str = "backend_config";
    pub const THEME: &str = "theme";
    pub const SESSION: &str = "session";
}

/// Key-indexed durable storage of whole JSON collections.
///
/// Every write is a full-collection overwrite, last writer wins. Reads
/// degrade to the type's default on a missing or malformed file; write
/// failures are logged and swallowed, since durability loss is
/// non-fatal to the running session.
#[derive(Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Opens the store rooted at `dir`, creating the directory if
    /// needed. This is the only store operation that can fail.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to create {:?}: {}", dir, e)))?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Loads a collection, falling back to `T::default()` when the
    /// file is missing (first run) or its content does not parse
    /// (corrupt or foreign-format JSON).
    pub async fn load<T>(&self, key: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        let path = self.path(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No stored '{}', starting empty", key);
                return T::default();
            }
            Err(e) => {
                tracing::warn!("Failed to read stored '{}': {}", key, e);
                return T::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Stored '{}' is malformed, falling back to default: {}", key, e);
                T::default()
            }
        }
    }

    /// Overwrites a collection. Failures are logged, never raised.
    pub async fn save<T>(&self, key: &str, value: &T)
    where
        T: Serialize + ?Sized,
    {
        let path = self.path(key);
        let body = match serde_json::to_vec_pretty(value) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Failed to serialize '{}': {}", key, e);
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&path, body).await {
            tracing::error!("Failed to persist '{}': {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Client;

    fn sample_clients() -> Vec<Client> {
        vec![Client {
            id: 1,
            name: "Acme Serviços".to_string(),
            tax_id: "12345678000190".to_string(),
            municipal_registration: "987654".to_string(),
            certificate_id: Some(7),
            active: true,
        }]
    }

    #[tokio::test]
    async fn round_trips_a_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();

        store.save(keys::CLIENTS, &sample_clients()).await;
        let loaded: Vec<Client> = store.load(keys::CLIENTS).await;
        assert_eq!(loaded, sample_clients());
    }

    #[tokio::test]
    async fn missing_key_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();

        let loaded: Vec<Client> = store.load(keys::CLIENTS).await;
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn malformed_key_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();

        store.save(keys::CLIENTS, &sample_clients()).await;
        tokio::fs::write(dir.path().join("certificates.json"), "{not json!")
            .await
            .unwrap();

        // Corrupt certificates fall back to empty...
        let certs: Vec<crate::models::Certificate> = store.load(keys::CERTIFICATES).await;
        assert!(certs.is_empty());

        // ...without affecting the valid clients key.
        let clients: Vec<Client> = store.load(keys::CLIENTS).await;
        assert_eq!(clients.len(), 1);
    }

    #[tokio::test]
    async fn foreign_format_json_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();

        // Valid JSON, wrong shape.
        tokio::fs::write(dir.path().join("clients.json"), r#"{"unexpected": true}"#)
            .await
            .unwrap();

        let clients: Vec<Client> = store.load(keys::CLIENTS).await;
        assert!(clients.is_empty());
    }
}
