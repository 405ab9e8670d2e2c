use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::{Result, TriplogError};

/// Secret storage addressed by a service name and a per-entry key.
pub trait CredentialVault: Send + Sync {
    fn get(&self, service: &str, key: &str) -> Result<Option<String>>;

    fn set(&self, service: &str, key: &str, secret: &str) -> Result<()>;

    /// Deleting an absent entry is not an error.
    fn delete(&self, service: &str, key: &str) -> Result<()>;
}

/// OS-backed vault (macOS Keychain, Windows Credential Manager, Linux Secret
/// Service) via the `keyring` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringVault;

impl CredentialVault for KeyringVault {
    fn get(&self, service: &str, key: &str) -> Result<Option<String>> {
        let entry = keyring::Entry::new(service, key)
            .map_err(|err| TriplogError::Vault(err.to_string()))?;

        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(TriplogError::Vault(err.to_string())),
        }
    }

    fn set(&self, service: &str, key: &str, secret: &str) -> Result<()> {
        let entry = keyring::Entry::new(service, key)
            .map_err(|err| TriplogError::Vault(err.to_string()))?;

        entry
            .set_password(secret)
            .map_err(|err| TriplogError::Vault(err.to_string()))
    }

    fn delete(&self, service: &str, key: &str) -> Result<()> {
        let entry = keyring::Entry::new(service, key)
            .map_err(|err| TriplogError::Vault(err.to_string()))?;

        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(TriplogError::Vault(err.to_string())),
        }
    }
}

/// In-memory vault intended for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryVault {
    inner: Arc<Mutex<HashMap<(String, String), String>>>,
}

impl MemoryVault {
    pub fn len(&self) -> usize {
        self.inner.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialVault for MemoryVault {
    fn get(&self, service: &str, key: &str) -> Result<Option<String>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| TriplogError::Vault("vault mutex is poisoned".to_string()))?;
        Ok(guard.get(&(service.to_string(), key.to_string())).cloned())
    }

    fn set(&self, service: &str, key: &str, secret: &str) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| TriplogError::Vault("vault mutex is poisoned".to_string()))?;
        guard.insert((service.to_string(), key.to_string()), secret.to_string());
        Ok(())
    }

    fn delete(&self, service: &str, key: &str) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| TriplogError::Vault("vault mutex is poisoned".to_string()))?;
        guard.remove(&(service.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_vault_round_trip() {
        let vault = MemoryVault::default();
        assert_eq!(vault.get("svc", "k").unwrap(), None);
        vault.set("svc", "k", "secret").unwrap();
        assert_eq!(vault.get("svc", "k").unwrap().as_deref(), Some("secret"));
        assert_eq!(vault.get("other", "k").unwrap(), None);
        vault.delete("svc", "k").unwrap();
        vault.delete("svc", "k").unwrap();
        assert!(vault.is_empty());
    }
}
