use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::controller::{FormError, FormResult};
use crate::descriptor::FieldValues;

/// Key-value persistence for serialized form state.
pub trait FormStateStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn save(&self, key: &str, payload: &str) -> Result<(), Self::Error>;
    fn load(&self, key: &str) -> Result<Option<String>, Self::Error>;
    fn clear(&self, key: &str) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct GroupState {
    pub expanded: bool,
    pub visible: bool,
}

impl Default for GroupState {
    fn default() -> Self {
        Self {
            expanded: true,
            visible: true,
        }
    }
}

/// What the orchestrator writes under its storage key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedFormState {
    pub values: FieldValues,
    pub expanded: bool,
    pub groups: BTreeMap<String, GroupState>,
}

impl Default for PersistedFormState {
    fn default() -> Self {
        Self {
            values: FieldValues::new(),
            expanded: true,
            groups: BTreeMap::new(),
        }
    }
}

impl PersistedFormState {
    pub fn save_to<S: FormStateStore>(&self, store: &S, key: &str) -> FormResult<()> {
        let payload = serde_json::to_string(self)
            .map_err(|error| FormError::Serialization(error.to_string()))?;
        store
            .save(key, &payload)
            .map_err(|error| FormError::StoreSaveFailed(error.to_string()))
    }

    /// `Ok(None)` when nothing is stored under `key`. A payload that does not
    /// parse is reported as a load failure.
    pub fn load_from<S: FormStateStore>(store: &S, key: &str) -> FormResult<Option<Self>> {
        let Some(payload) = store
            .load(key)
            .map_err(|error| FormError::StoreLoadFailed(error.to_string()))?
        else {
            return Ok(None);
        };
        serde_json::from_str(&payload)
            .map(Some)
            .map_err(|error| FormError::StoreLoadFailed(error.to_string()))
    }

    pub fn clear_from<S: FormStateStore>(store: &S, key: &str) -> FormResult<()> {
        store
            .clear(key)
            .map_err(|error| FormError::StoreClearFailed(error.to_string()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryFormStore {
    state: Arc<RwLock<BTreeMap<String, String>>>,
}

impl InMemoryFormStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        let state = match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.get(key).cloned()
    }
}

impl FormStateStore for InMemoryFormStore {
    type Error = Infallible;

    fn save(&self, key: &str, payload: &str) -> Result<(), Self::Error> {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.insert(key.to_string(), payload.to_string());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>, Self::Error> {
        Ok(self.raw(key))
    }

    fn clear(&self, key: &str) -> Result<(), Self::Error> {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.remove(key);
        Ok(())
    }
}
