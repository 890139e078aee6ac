use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use super::error::Result;

/// Fjall-backed shared state store exposing only atomic primitives.
///
/// All coordination state (job records, the recency index, the admission
/// ledger) goes through this type. Every mutation acquires the store lock,
/// so compound operations (merge a field map, push-if-absent, clamp a
/// counter) are atomic from the caller's point of view. Callers must never
/// reconstruct these operations out of separate reads and writes.
///
/// Partitions:
/// - `hashes`: key -> string-keyed field map (JSON); the only kind with expiry
/// - `lists`: key -> ordered string list (JSON)
/// - `sets`: key -> unique string set (JSON, sorted)
/// - `counters`: key -> i64 (big-endian)
/// - `expiries`: key -> unix-seconds deadline (big-endian i64)
pub struct KvStore {
    keyspace: Keyspace,
    hashes: PartitionHandle,
    lists: PartitionHandle,
    sets: PartitionHandle,
    counters: PartitionHandle,
    expiries: PartitionHandle,
    lock: Mutex<()>,
}

/// Unix timestamp in seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

impl KvStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening state store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let hashes = keyspace.open_partition("hashes", PartitionCreateOptions::default())?;
        let lists = keyspace.open_partition("lists", PartitionCreateOptions::default())?;
        let sets = keyspace.open_partition("sets", PartitionCreateOptions::default())?;
        let counters = keyspace.open_partition("counters", PartitionCreateOptions::default())?;
        let expiries = keyspace.open_partition("expiries", PartitionCreateOptions::default())?;

        info!("State store opened");
        Ok(Self {
            keyspace,
            hashes,
            lists,
            sets,
            counters,
            expiries,
            lock: Mutex::new(()),
        })
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // A poisoned lock only means another thread panicked mid-operation;
        // the partitions themselves are still consistent per write.
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- hash primitives ----

    /// Merge fields into the map at `key`, creating it if absent.
    pub fn hash_merge(&self, key: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        let _g = self.guard();
        let mut map = self.read_live_hash(key)?.unwrap_or_default();
        for (name, value) in fields {
            map.insert(name.clone(), value.clone());
        }
        self.hashes.insert(key, serde_json::to_vec(&map)?)?;
        debug!(key, "Hash merged");
        Ok(())
    }

    /// Merge fields into the map at `key` only if it already exists.
    /// Returns false (without writing) when the key is absent or expired.
    pub fn hash_update(&self, key: &str, fields: &BTreeMap<String, String>) -> Result<bool> {
        let _g = self.guard();
        let Some(mut map) = self.read_live_hash(key)? else {
            return Ok(false);
        };
        for (name, value) in fields {
            map.insert(name.clone(), value.clone());
        }
        self.hashes.insert(key, serde_json::to_vec(&map)?)?;
        Ok(true)
    }

    /// Read the full field map at `key`; expired keys read as absent.
    pub fn hash_get(&self, key: &str) -> Result<Option<BTreeMap<String, String>>> {
        let _g = self.guard();
        self.read_live_hash(key)
    }

    /// Remove the map at `key`. Returns true if something was removed.
    pub fn hash_delete(&self, key: &str) -> Result<bool> {
        let _g = self.guard();
        let existed = self.hashes.get(key)?.is_some();
        self.hashes.remove(key)?;
        self.expiries.remove(key)?;
        Ok(existed)
    }

    /// Set (or refresh) the expiry deadline for a hash key.
    pub fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let _g = self.guard();
        let deadline = now_secs() + ttl.as_secs() as i64;
        self.expiries.insert(key, deadline.to_be_bytes())?;
        Ok(())
    }

    /// Read a hash, treating an expired entry as absent and reclaiming it.
    fn read_live_hash(&self, key: &str) -> Result<Option<BTreeMap<String, String>>> {
        if let Some(bytes) = self.expiries.get(key)? {
            let deadline = i64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8]));
            if now_secs() >= deadline {
                self.hashes.remove(key)?;
                self.expiries.remove(key)?;
                debug!(key, "Expired entry reclaimed");
                return Ok(None);
            }
        }
        match self.hashes.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    // ---- list primitives ----

    /// Push an item at the head of the list (most recent first).
    pub fn list_push_front(&self, key: &str, item: &str) -> Result<()> {
        let _g = self.guard();
        let mut list = self.read_list(key)?;
        list.insert(0, item.to_string());
        self.lists.insert(key, serde_json::to_vec(&list)?)?;
        Ok(())
    }

    /// Append an item at the tail unless it is already present anywhere
    /// in the list. Returns true if the item was appended.
    pub fn list_push_back_unique(&self, key: &str, item: &str) -> Result<bool> {
        let _g = self.guard();
        let mut list = self.read_list(key)?;
        if list.iter().any(|existing| existing == item) {
            return Ok(false);
        }
        list.push(item.to_string());
        self.lists.insert(key, serde_json::to_vec(&list)?)?;
        Ok(true)
    }

    /// Remove all occurrences of an item from the list.
    pub fn list_remove(&self, key: &str, item: &str) -> Result<()> {
        let _g = self.guard();
        let mut list = self.read_list(key)?;
        let before = list.len();
        list.retain(|existing| existing != item);
        if list.len() != before {
            self.lists.insert(key, serde_json::to_vec(&list)?)?;
        }
        Ok(())
    }

    /// Read up to `limit` items from the head of the list (all when None).
    pub fn list_range(&self, key: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let _g = self.guard();
        let mut list = self.read_list(key)?;
        if let Some(limit) = limit {
            list.truncate(limit);
        }
        Ok(list)
    }

    /// Number of items in the list.
    pub fn list_len(&self, key: &str) -> Result<usize> {
        let _g = self.guard();
        Ok(self.read_list(key)?.len())
    }

    /// Drop the list entirely.
    pub fn list_clear(&self, key: &str) -> Result<()> {
        let _g = self.guard();
        self.lists.remove(key)?;
        Ok(())
    }

    fn read_list(&self, key: &str) -> Result<Vec<String>> {
        match self.lists.get(key)? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Ok(Vec::new()),
        }
    }

    // ---- set primitives ----

    /// Add a member to the set.
    pub fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let _g = self.guard();
        let mut members = self.read_set(key)?;
        if members.iter().all(|existing| existing != member) {
            members.push(member.to_string());
            members.sort();
            self.sets.insert(key, serde_json::to_vec(&members)?)?;
        }
        Ok(())
    }

    /// Remove a member from the set.
    pub fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let _g = self.guard();
        let mut members = self.read_set(key)?;
        let before = members.len();
        members.retain(|existing| existing != member);
        if members.len() != before {
            self.sets.insert(key, serde_json::to_vec(&members)?)?;
        }
        Ok(())
    }

    /// All members of the set.
    pub fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let _g = self.guard();
        self.read_set(key)
    }

    /// Drop the set entirely.
    pub fn set_clear(&self, key: &str) -> Result<()> {
        let _g = self.guard();
        self.sets.remove(key)?;
        Ok(())
    }

    fn read_set(&self, key: &str) -> Result<Vec<String>> {
        match self.sets.get(key)? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Ok(Vec::new()),
        }
    }

    // ---- counter primitives ----

    /// Atomically increment the counter and return the new value.
    pub fn counter_incr(&self, key: &str) -> Result<i64> {
        let _g = self.guard();
        let value = self.read_counter(key)? + 1;
        self.counters.insert(key, value.to_be_bytes())?;
        Ok(value)
    }

    /// Atomically decrement the counter and return the new value.
    pub fn counter_decr(&self, key: &str) -> Result<i64> {
        let _g = self.guard();
        let value = self.read_counter(key)? - 1;
        self.counters.insert(key, value.to_be_bytes())?;
        Ok(value)
    }

    /// Current counter value (0 when unset).
    pub fn counter_get(&self, key: &str) -> Result<i64> {
        let _g = self.guard();
        self.read_counter(key)
    }

    /// Overwrite the counter.
    pub fn counter_set(&self, key: &str, value: i64) -> Result<()> {
        let _g = self.guard();
        self.counters.insert(key, value.to_be_bytes())?;
        Ok(())
    }

    fn read_counter(&self, key: &str) -> Result<i64> {
        Ok(self
            .counters
            .get(key)?
            .map(|bytes| i64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0))
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}
