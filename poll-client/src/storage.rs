use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{PollError, Result};
use crate::model::PollId;
use crate::pager::ViewFilter;

const WALLET_ADDRESS_KEY: &str = "walletAddress";
const LAST_FUNDED_PREFIX: &str = "lastFunded_";
const VIEW_FILTER_KEY: &str = "pollViewFilter";
const SELECTED_OPTIONS_PREFIX: &str = "selectedOptions_";

/// String key-value persistence in the shape of browser local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// All keys in one JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let values = match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| PollError::Storage(format!("Failed to deserialize {}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(PollError::Storage(format!(
                    "Failed to read {}: {:?}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let data = serde_json::to_vec_pretty(values)
            .map_err(|e| PollError::Storage(format!("Failed to serialize store: {}", e)))?;

        fs::write(&self.path, data)
            .map_err(|e| PollError::Storage(format!("Failed to write {}: {:?}", self.path.display(), e)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value.to_string());
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock();
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }
}

// Lower-case hex, the form wallets hand out.
fn address_key(prefix: &str, address: &Address) -> String {
    format!("{}0x{}", prefix, hex::encode(address))
}

/// Typed access to everything the client keeps between sessions.
pub struct ClientStorage<S> {
    store: S,
}

impl<S: KeyValueStore> ClientStorage<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The last connected address. An unparseable value is logged and ignored.
    pub fn load_address(&self) -> Result<Option<Address>> {
        let Some(value) = self.store.get(WALLET_ADDRESS_KEY)? else {
            return Ok(None);
        };

        match value.parse::<Address>() {
            Ok(address) => Ok(Some(address)),
            Err(e) => {
                warn!(value = %value, "ignoring stored wallet address: {}", e);
                Ok(None)
            }
        }
    }

    pub fn save_address(&self, address: &Address) -> Result<()> {
        self.store.set(WALLET_ADDRESS_KEY, &address_key("", address))
    }

    pub fn clear_address(&self) -> Result<()> {
        self.store.remove(WALLET_ADDRESS_KEY)
    }

    pub fn last_funded(&self, address: &Address) -> Result<Option<DateTime<Utc>>> {
        let Some(value) = self.store.get(&address_key(LAST_FUNDED_PREFIX, address))? else {
            return Ok(None);
        };

        let millis = value
            .trim()
            .parse::<i64>()
            .map_err(|e| PollError::Storage(format!("Failed to parse funding timestamp {:?}: {}", value, e)))?;

        DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or_else(|| PollError::Storage(format!("Funding timestamp out of range: {}", millis)))
    }

    pub fn record_funding(&self, address: &Address, at: DateTime<Utc>) -> Result<()> {
        self.store.set(
            &address_key(LAST_FUNDED_PREFIX, address),
            &at.timestamp_millis().to_string(),
        )
    }

    pub fn view_filter(&self) -> Result<ViewFilter> {
        match self.store.get(VIEW_FILTER_KEY)? {
            Some(value) => serde_json::from_str(&value)
                .map_err(|e| PollError::Storage(format!("Failed to deserialize view filter: {}", e))),
            None => Ok(ViewFilter::default()),
        }
    }

    pub fn save_view_filter(&self, filter: ViewFilter) -> Result<()> {
        let value = serde_json::to_string(&filter)
            .map_err(|e| PollError::Storage(format!("Failed to serialize view filter: {}", e)))?;
        self.store.set(VIEW_FILTER_KEY, &value)
    }

    /// Unsubmitted option choices of `address`, by poll.
    pub fn selections(&self, address: &Address) -> Result<BTreeMap<PollId, String>> {
        match self.store.get(&address_key(SELECTED_OPTIONS_PREFIX, address))? {
            Some(value) => serde_json::from_str(&value)
                .map_err(|e| PollError::Storage(format!("Failed to deserialize selections: {}", e))),
            None => Ok(BTreeMap::new()),
        }
    }

    pub fn save_selection(&self, address: &Address, poll_id: PollId, label: &str) -> Result<()> {
        let mut selections = self.selections(address)?;
        selections.insert(poll_id, label.to_string());
        self.write_selections(address, &selections)
    }

    pub fn clear_selection(&self, address: &Address, poll_id: PollId) -> Result<()> {
        let mut selections = self.selections(address)?;
        if selections.remove(&poll_id).is_none() {
            return Ok(());
        }
        self.write_selections(address, &selections)
    }

    fn write_selections(&self, address: &Address, selections: &BTreeMap<PollId, String>) -> Result<()> {
        let key = address_key(SELECTED_OPTIONS_PREFIX, address);
        if selections.is_empty() {
            return self.store.remove(&key);
        }

        let value = serde_json::to_string(selections)
            .map_err(|e| PollError::Storage(format!("Failed to serialize selections: {}", e)))?;
        self.store.set(&key, &value)
    }
}
