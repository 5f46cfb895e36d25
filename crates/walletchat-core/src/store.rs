//! Keyed record collections.
//!
//! Every piece of engine state (sent and received invites, threads, message
//! logs, key records, the keychain) lives in a [`Store`]. Two backends:
//!
//! - [`MemoryStore`] for tests and ephemeral clients
//! - [`RedbStore`] for durable state, one redb table per context, JSON values

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::error::{ChatError, ChatResult};
use crate::types::{
    IdentityKeyRecord, InviteKeyRecord, MessageLog, ReceivedInvite, SentInvite, Thread,
};

/// A persisted keyed collection.
pub trait Store<V>: Send + Sync {
    /// Name of the collection, used in errors and logs.
    fn context(&self) -> &str;

    fn get(&self, key: &str) -> ChatResult<Option<V>>;

    /// Insert or overwrite.
    fn set(&self, key: &str, value: V) -> ChatResult<()>;

    /// Mutate an existing record in place and return the new value.
    ///
    /// Fails with `NotFound` if the key is absent.
    fn update(&self, key: &str, apply: &mut dyn FnMut(&mut V)) -> ChatResult<V>;

    /// Remove a record. Deleting an absent key is not an error.
    fn delete(&self, key: &str, reason: &str) -> ChatResult<()>;

    fn get_all(&self) -> ChatResult<Vec<V>>;

    fn keys(&self) -> ChatResult<Vec<String>>;

    /// Like [`Store::get`] but absence is an error.
    fn require(&self, key: &str) -> ChatResult<V> {
        self.get(key)?.ok_or_else(|| ChatError::NotFound {
            context: self.context().to_string(),
            key: key.to_string(),
        })
    }

    fn contains(&self, key: &str) -> ChatResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn filter(&self, predicate: &dyn Fn(&V) -> bool) -> ChatResult<Vec<V>> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|v| predicate(v))
            .collect())
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

pub struct MemoryStore<V> {
    context: String,
    records: RwLock<BTreeMap<String, V>>,
}

impl<V> MemoryStore<V> {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<V: Clone + Send + Sync> Store<V> for MemoryStore<V> {
    fn context(&self) -> &str {
        &self.context
    }

    fn get(&self, key: &str) -> ChatResult<Option<V>> {
        Ok(self.records.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: V) -> ChatResult<()> {
        self.records.write().insert(key.to_string(), value);
        Ok(())
    }

    fn update(&self, key: &str, apply: &mut dyn FnMut(&mut V)) -> ChatResult<V> {
        let mut records = self.records.write();
        let value = records.get_mut(key).ok_or_else(|| ChatError::NotFound {
            context: self.context.clone(),
            key: key.to_string(),
        })?;
        apply(value);
        Ok(value.clone())
    }

    fn delete(&self, key: &str, reason: &str) -> ChatResult<()> {
        if self.records.write().remove(key).is_some() {
            debug!(context = %self.context, key, reason, "Deleted record");
        }
        Ok(())
    }

    fn get_all(&self) -> ChatResult<Vec<V>> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn keys(&self) -> ChatResult<Vec<String>> {
        Ok(self.records.read().keys().cloned().collect())
    }
}

// ============================================================================
// redb backend
// ============================================================================

/// Shared redb database that hands out one [`RedbStore`] per context.
#[derive(Clone)]
pub struct ChatDatabase {
    db: Arc<RwLock<Database>>,
}

impl ChatDatabase {
    /// Open or create the database file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Open the table for `context`, creating it if needed.
    pub fn store<V>(&self, context: &str) -> ChatResult<RedbStore<V>> {
        let store = RedbStore {
            db: self.db.clone(),
            context: context.to_string(),
            _value: PhantomData,
        };
        {
            let db = self.db.read();
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(store.table())?;
            }
            write_txn.commit()?;
        }
        Ok(store)
    }
}

pub struct RedbStore<V> {
    db: Arc<RwLock<Database>>,
    context: String,
    _value: PhantomData<fn() -> V>,
}

impl<V> RedbStore<V> {
    fn table(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.context)
    }
}

impl<V> Store<V> for RedbStore<V>
where
    V: Serialize + DeserializeOwned,
{
    fn context(&self) -> &str {
        &self.context
    }

    fn get(&self, key: &str) -> ChatResult<Option<V>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(self.table())?;
        let value = match table.get(key)? {
            Some(v) => Some(serde_json::from_slice(v.value())?),
            None => None,
        };
        Ok(value)
    }

    fn set(&self, key: &str, value: V) -> ChatResult<()> {
        let data = serde_json::to_vec(&value)?;
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(self.table())?;
            table.insert(key, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn update(&self, key: &str, apply: &mut dyn FnMut(&mut V)) -> ChatResult<V> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(self.table())?;
            let mut current: V = match table.get(key)? {
                Some(v) => serde_json::from_slice(v.value())?,
                None => {
                    return Err(ChatError::NotFound {
                        context: self.context.clone(),
                        key: key.to_string(),
                    })
                }
            };
            apply(&mut current);
            let data = serde_json::to_vec(&current)?;
            table.insert(key, data.as_slice())?;
            current
        };
        write_txn.commit()?;
        Ok(updated)
    }

    fn delete(&self, key: &str, reason: &str) -> ChatResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(self.table())?;
            let previous = table.remove(key)?;
            previous.is_some()
        };
        write_txn.commit()?;
        if removed {
            debug!(context = %self.context, key, reason, "Deleted record");
        }
        Ok(())
    }

    fn get_all(&self) -> ChatResult<Vec<V>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(self.table())?;

        let mut values = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            values.push(serde_json::from_slice(value.value())?);
        }
        Ok(values)
    }

    fn keys(&self) -> ChatResult<Vec<String>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(self.table())?;

        let mut keys = Vec::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }
}

// ============================================================================
// Engine state bundle
// ============================================================================

/// Every collection the chat engine persists.
#[derive(Clone)]
pub struct ChatStores {
    pub keychain: Arc<dyn Store<String>>,
    pub identity_keys: Arc<dyn Store<IdentityKeyRecord>>,
    pub invite_keys: Arc<dyn Store<InviteKeyRecord>>,
    /// Keyed by response topic
    pub sent_invites: Arc<dyn Store<SentInvite>>,
    /// Keyed by invite id
    pub received_invites: Arc<dyn Store<ReceivedInvite>>,
    /// Keyed by thread topic
    pub threads: Arc<dyn Store<Thread>>,
    /// Keyed by thread topic
    pub messages: Arc<dyn Store<MessageLog>>,
}

impl ChatStores {
    pub fn in_memory() -> Self {
        Self {
            keychain: Arc::new(MemoryStore::new("keychain")),
            identity_keys: Arc::new(MemoryStore::new("identityKeys")),
            invite_keys: Arc::new(MemoryStore::new("inviteKeys")),
            sent_invites: Arc::new(MemoryStore::new("sentInvites")),
            received_invites: Arc::new(MemoryStore::new("receivedInvites")),
            threads: Arc::new(MemoryStore::new("threads")),
            messages: Arc::new(MemoryStore::new("messages")),
        }
    }

    /// One table per collection in `db`.
    pub fn open(db: &ChatDatabase) -> ChatResult<Self> {
        Ok(Self {
            keychain: Arc::new(db.store::<String>("keychain")?),
            identity_keys: Arc::new(db.store::<IdentityKeyRecord>("identityKeys")?),
            invite_keys: Arc::new(db.store::<InviteKeyRecord>("inviteKeys")?),
            sent_invites: Arc::new(db.store::<SentInvite>("sentInvites")?),
            received_invites: Arc::new(db.store::<ReceivedInvite>("receivedInvites")?),
            threads: Arc::new(db.store::<Thread>("threads")?),
            messages: Arc::new(db.store::<MessageLog>("messages")?),
        })
    }
}
