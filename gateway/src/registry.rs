//! Registration lookup.
//!
//! Registration management (CRUD, persistence) is an external collaborator;
//! the gateway core only needs to resolve an app id to its registered
//! identity. The in-memory store is seeded from a JSON file at startup.

use attestation_tdx::types::Registration;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse registry file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Resolves registrations by app id.
pub trait RegistrationStore: Send + Sync {
    fn get(&self, app_id: &str) -> Option<Registration>;

    fn list(&self) -> Vec<Registration>;
}

/// In-memory registration store.
pub struct MemoryRegistry {
    registrations: HashMap<String, Registration>,
}

impl MemoryRegistry {
    pub fn new(registrations: Vec<Registration>) -> Self {
        Self {
            registrations: registrations
                .into_iter()
                .map(|r| (r.id.clone(), r))
                .collect(),
        }
    }

    /// Load a registry from a JSON array of registrations.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path)?;
        let registrations: Vec<Registration> = serde_json::from_str(&raw)?;
        tracing::info!("loaded {} registration(s)", registrations.len());
        Ok(Self::new(registrations))
    }
}

impl RegistrationStore for MemoryRegistry {
    fn get(&self, app_id: &str) -> Option<Registration> {
        self.registrations.get(app_id).cloned()
    }

    fn list(&self) -> Vec<Registration> {
        self.registrations.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(id: &str) -> Registration {
        serde_json::from_str(&format!(
            r#"{{
                "id": "{id}",
                "name": "demo",
                "image_repository": "ghcr.io/org/demo",
                "forge_owner": "org",
                "forge_repo": "demo",
                "app_endpoint": "http://127.0.0.1:1",
                "quote_provider_endpoint": "http://127.0.0.1:2"
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_lookup() {
        let registry = MemoryRegistry::new(vec![registration("a"), registration("b")]);
        assert!(registry.get("a").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.list().len(), 2);
    }
}
