//! Where issued credentials are kept.
//!
//! # Invariants
//! - A credential is never removed. Revocation clears `is_active`.
//! - Updates touch one field, so a usage stamp cannot undo a concurrent
//!   revocation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use redis::Script;

use super::credential::{CredentialError, IssuedCredential};
use crate::shared_store::SharedStore;

/// Persistence for [`IssuedCredential`]s.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Store a credential unless its key id is taken. Returns whether it was
    /// stored.
    async fn insert(&self, credential: IssuedCredential) -> Result<bool, CredentialError>;

    /// Look up a credential.
    async fn get(&self, key_id: &str) -> Result<Option<IssuedCredential>, CredentialError>;

    /// Clear `is_active`. Returns `false` if the key id is unknown.
    async fn deactivate(&self, key_id: &str) -> Result<bool, CredentialError>;

    /// Set `last_used_at`. Unknown key ids are ignored.
    async fn stamp_used(&self, key_id: &str, at_secs: u64) -> Result<(), CredentialError>;
}

/// Credentials held in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<HashMap<String, IssuedCredential>>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn update(
        &self,
        key_id: &str,
        apply: impl FnOnce(&mut IssuedCredential),
    ) -> Result<bool, CredentialError> {
        let mut credentials = self
            .credentials
            .write()
            .map_err(|_| CredentialError::LockPoisoned)?;
        Ok(credentials.get_mut(key_id).map(apply).is_some())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn insert(&self, credential: IssuedCredential) -> Result<bool, CredentialError> {
        let mut credentials = self
            .credentials
            .write()
            .map_err(|_| CredentialError::LockPoisoned)?;
        if credentials.contains_key(&credential.key_id) {
            return Ok(false);
        }
        credentials.insert(credential.key_id.clone(), credential);
        Ok(true)
    }

    async fn get(&self, key_id: &str) -> Result<Option<IssuedCredential>, CredentialError> {
        let credentials = self
            .credentials
            .read()
            .map_err(|_| CredentialError::LockPoisoned)?;
        Ok(credentials.get(key_id).cloned())
    }

    async fn deactivate(&self, key_id: &str) -> Result<bool, CredentialError> {
        self.update(key_id, |credential| credential.is_active = false)
    }

    async fn stamp_used(&self, key_id: &str, at_secs: u64) -> Result<(), CredentialError> {
        self.update(key_id, |credential| credential.last_used_at = Some(at_secs))
            .map(|_| ())
    }
}

/// Hash field holding the immutable part of a credential as JSON.
const RECORD_FIELD: &str = "record";
const ACTIVE_FIELD: &str = "is_active";
const LAST_USED_FIELD: &str = "last_used_at";

/// `KEYS[1]` credential hash; `ARGV` record JSON. Replies 1 if stored.
const INSERT_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'record', ARGV[1], 'is_active', '1')
return 1
";

/// `KEYS[1]` credential hash; `ARGV` field, value. Replies 1 if the hash
/// exists.
const UPDATE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return 1
";

/// Credentials in the shared store, one hash per key id at
/// `<namespace>:credential:<key_id>`.
pub struct RedisCredentialStore {
    store: Arc<SharedStore>,
    namespace: String,
    insert: Script,
    update: Script,
}

impl std::fmt::Debug for RedisCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCredentialStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl RedisCredentialStore {
    /// Create a store keeping credentials under `namespace`.
    #[must_use]
    pub fn new(store: Arc<SharedStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            insert: Script::new(INSERT_SCRIPT),
            update: Script::new(UPDATE_SCRIPT),
        }
    }

    fn hash_key(&self, key_id: &str) -> String {
        format!("{}:credential:{key_id}", self.namespace)
    }

    async fn set_field(&self, key_id: &str, field: &str, value: String) -> Result<bool, CredentialError> {
        let hash = self.hash_key(key_id);
        let updated: i64 = self
            .store
            .run_script(&self.update, &[hash.as_str()], &[field.to_string(), value])
            .await
            .map_err(|e| CredentialError::Store(e.to_string()))?;
        Ok(updated == 1)
    }
}

/// Rebuild a credential from its hash fields.
fn credential_from_fields(
    fields: &HashMap<String, String>,
) -> Result<Option<IssuedCredential>, CredentialError> {
    let Some(record) = fields.get(RECORD_FIELD) else {
        return Ok(None);
    };
    let mut credential: IssuedCredential = serde_json::from_str(record)
        .map_err(|e| CredentialError::Store(format!("corrupt credential record: {e}")))?;
    credential.is_active = fields.get(ACTIVE_FIELD).is_some_and(|v| v == "1");
    credential.last_used_at = fields
        .get(LAST_USED_FIELD)
        .and_then(|v| v.parse().ok());
    Ok(Some(credential))
}

#[async_trait]
impl CredentialStore for RedisCredentialStore {
    async fn insert(&self, credential: IssuedCredential) -> Result<bool, CredentialError> {
        let hash = self.hash_key(&credential.key_id);
        let record = serde_json::to_string(&credential)
            .map_err(|e| CredentialError::Store(e.to_string()))?;
        let inserted: i64 = self
            .store
            .run_script(&self.insert, &[hash.as_str()], &[record])
            .await
            .map_err(|e| CredentialError::Store(e.to_string()))?;
        Ok(inserted == 1)
    }

    async fn get(&self, key_id: &str) -> Result<Option<IssuedCredential>, CredentialError> {
        let fields: HashMap<String, String> = self
            .store
            .run_command(redis::cmd("HGETALL").arg(self.hash_key(key_id)))
            .await
            .map_err(|e| CredentialError::Store(e.to_string()))?;
        credential_from_fields(&fields)
    }

    async fn deactivate(&self, key_id: &str) -> Result<bool, CredentialError> {
        self.set_field(key_id, ACTIVE_FIELD, "0".to_string()).await
    }

    async fn stamp_used(&self, key_id: &str, at_secs: u64) -> Result<(), CredentialError> {
        self.set_field(key_id, LAST_USED_FIELD, at_secs.to_string())
            .await
            .map(|_| ())
    }
}
