use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::events::FormEvent;
use super::history::{DEFAULT_MAX_HISTORY, History, StateSnapshot};
use super::rules::ValidationRule;
use super::validation::ValidationScope;
use crate::descriptor::{FieldKey, FieldValues, FormItemDescriptor, dedupe_last_wins};
use crate::event::{EventEmitter, WeakEventEmitter};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FormError {
    StatePoisoned(&'static str),
    StoreLoadFailed(String),
    StoreSaveFailed(String),
    StoreClearFailed(String),
    Serialization(String),
}

impl Display for FormError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::StatePoisoned(context) => {
                write!(f, "form state lock poisoned while {context}")
            }
            FormError::StoreLoadFailed(error) => write!(f, "failed to load form state: {error}"),
            FormError::StoreSaveFailed(error) => write!(f, "failed to save form state: {error}"),
            FormError::StoreClearFailed(error) => {
                write!(f, "failed to clear form state: {error}")
            }
            FormError::Serialization(error) => {
                write!(f, "failed to encode form state: {error}")
            }
        }
    }
}

impl std::error::Error for FormError {}

pub type FormResult<T> = Result<T, FormError>;

/// Values, errors and touched flags of every field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormState {
    pub values: FieldValues,
    pub errors: BTreeMap<FieldKey, String>,
    pub touched: BTreeMap<FieldKey, bool>,
}

/// Partial replacement for [`FormStateManager::set_state`]; `None` parts are
/// left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatePatch {
    pub values: Option<FieldValues>,
    pub errors: Option<BTreeMap<FieldKey, String>>,
    pub touched: Option<BTreeMap<FieldKey, bool>>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(mut self, values: FieldValues) -> Self {
        self.values = Some(values);
        self
    }

    pub fn errors(mut self, errors: BTreeMap<FieldKey, String>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn touched(mut self, touched: BTreeMap<FieldKey, bool>) -> Self {
        self.touched = Some(touched);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormStateOptions {
    pub initial_values: FieldValues,
    pub validate_on_change: bool,
    pub validate_on_blur: bool,
    pub validation_delay: Duration,
    /// Leave fields without an initial or default value absent instead of
    /// filling a type default.
    pub preserve_undefined: bool,
    pub max_history: usize,
}

impl Default for FormStateOptions {
    fn default() -> Self {
        Self {
            initial_values: FieldValues::new(),
            validate_on_change: true,
            validate_on_blur: true,
            validation_delay: Duration::from_millis(300),
            preserve_undefined: false,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

impl FormStateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_value(mut self, key: impl Into<FieldKey>, value: impl Into<Value>) -> Self {
        self.initial_values.insert(key.into(), value.into());
        self
    }

    pub fn initial_values(mut self, values: FieldValues) -> Self {
        self.initial_values = values;
        self
    }

    pub fn validate_on_change(mut self, enabled: bool) -> Self {
        self.validate_on_change = enabled;
        self
    }

    pub fn validate_on_blur(mut self, enabled: bool) -> Self {
        self.validate_on_blur = enabled;
        self
    }

    pub fn validation_delay(mut self, delay: Duration) -> Self {
        self.validation_delay = delay;
        self
    }

    pub fn preserve_undefined(mut self, preserve: bool) -> Self {
        self.preserve_undefined = preserve;
        self
    }

    pub fn max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    fn default_for(&self, item: &FormItemDescriptor) -> Option<Value> {
        item.default_value
            .clone()
            .or_else(|| (!self.preserve_undefined).then(|| item.field_type.default_value()))
    }

    fn initial_for(&self, item: &FormItemDescriptor) -> Option<Value> {
        self.initial_values
            .get(&item.key)
            .cloned()
            .or_else(|| self.default_for(item))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SetValueOptions {
    /// `None` follows [`FormStateOptions::validate_on_change`].
    pub validate: Option<bool>,
    pub touch: bool,
    pub silent: bool,
}

impl Default for SetValueOptions {
    fn default() -> Self {
        Self {
            validate: None,
            touch: true,
            silent: false,
        }
    }
}

impl SetValueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn touch(mut self, touch: bool) -> Self {
        self.touch = touch;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SetValuesOptions {
    pub validate: Option<bool>,
    pub touch: bool,
    pub silent: bool,
    /// `false` replaces the whole value map.
    pub merge: bool,
}

impl Default for SetValuesOptions {
    fn default() -> Self {
        Self {
            validate: None,
            touch: true,
            silent: false,
            merge: true,
        }
    }
}

impl SetValuesOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn touch(mut self, touch: bool) -> Self {
        self.touch = touch;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }
}

pub(super) struct ManagerState {
    pub(super) descriptors: IndexMap<FieldKey, FormItemDescriptor>,
    /// Baseline for dirty tracking and `reset()`.
    pub(super) initial: FormState,
    pub(super) current: FormState,
    pub(super) history: History,
    pub(super) next_ticket: u64,
    pub(super) tickets: BTreeMap<ValidationScope, ValidationTicket>,
    pub(super) destroyed: bool,
}

impl ManagerState {
    fn record(&mut self) {
        let snapshot = StateSnapshot::capture(&self.current);
        self.history.push(snapshot);
    }
}

/// Queued debounced validations, at most one per scope.
pub(super) type PendingValidations = IndexMap<ValidationScope, BoxFuture<'static, ()>>;

type RuleRegistry = BTreeMap<FieldKey, Vec<ValidationRule>>;

/// Owns the values, errors and touched flags of one form, with debounced
/// validation and a bounded undo/redo history. Clones share state.
#[derive(Clone)]
pub struct FormStateManager {
    pub(super) options: Arc<FormStateOptions>,
    pub(super) state: Arc<RwLock<ManagerState>>,
    pub(super) rules: Arc<RwLock<RuleRegistry>>,
    pub(super) events: EventEmitter<FormEvent>,
    pub(super) pending: Arc<Mutex<PendingValidations>>,
}

/// Handle held by queued validations so the queue never keeps its own
/// manager alive.
pub(super) struct WeakFormStateManager {
    options: Arc<FormStateOptions>,
    state: Weak<RwLock<ManagerState>>,
    rules: Weak<RwLock<RuleRegistry>>,
    events: WeakEventEmitter<FormEvent>,
    pending: Weak<Mutex<PendingValidations>>,
}

impl WeakFormStateManager {
    pub(super) fn upgrade(&self) -> Option<FormStateManager> {
        Some(FormStateManager {
            options: self.options.clone(),
            state: self.state.upgrade()?,
            rules: self.rules.upgrade()?,
            events: self.events.upgrade()?,
            pending: self.pending.upgrade()?,
        })
    }
}

impl FormStateManager {
    pub fn new(items: Vec<FormItemDescriptor>, options: FormStateOptions) -> Self {
        let descriptors = dedupe_last_wins(&items);
        let initial = initial_state(&descriptors, &options);
        let mut state = ManagerState {
            descriptors,
            current: initial.clone(),
            initial,
            history: History::new(options.max_history),
            next_ticket: 0,
            tickets: BTreeMap::new(),
            destroyed: false,
        };
        state.record();
        Self {
            options: Arc::new(options),
            state: Arc::new(RwLock::new(state)),
            rules: Arc::new(RwLock::new(BTreeMap::new())),
            events: EventEmitter::new(),
            pending: Arc::new(Mutex::new(PendingValidations::new())),
        }
    }

    pub(super) fn downgrade(&self) -> WeakFormStateManager {
        WeakFormStateManager {
            options: self.options.clone(),
            state: Arc::downgrade(&self.state),
            rules: Arc::downgrade(&self.rules),
            events: self.events.downgrade(),
            pending: Arc::downgrade(&self.pending),
        }
    }

    pub fn options(&self) -> &FormStateOptions {
        &self.options
    }

    pub fn events(&self) -> &EventEmitter<FormEvent> {
        &self.events
    }

    pub fn descriptors(&self) -> FormResult<Vec<FormItemDescriptor>> {
        Ok(read_lock(&self.state, "reading descriptors")?
            .descriptors
            .values()
            .cloned()
            .collect())
    }

    /// Swaps in a new descriptor list. New keys receive their initial value
    /// and an untouched flag; keys that vanished lose their value, error and
    /// touched entries.
    pub fn update_config(&self, items: Vec<FormItemDescriptor>) -> FormResult<()> {
        let descriptors = dedupe_last_wins(&items);
        let keys = {
            let mut guard = write_lock(&self.state, "updating form configuration")?;
            let state = &mut *guard;
            for (key, item) in &descriptors {
                if state.descriptors.contains_key(key) {
                    continue;
                }
                if let Some(value) = self.options.initial_for(item) {
                    state.current.values.entry(key.clone()).or_insert(value.clone());
                    state.initial.values.entry(key.clone()).or_insert(value);
                }
                state.current.touched.entry(key.clone()).or_insert(false);
                state.initial.touched.entry(key.clone()).or_insert(false);
            }

            let removed = state
                .descriptors
                .keys()
                .filter(|key| !descriptors.contains_key(*key))
                .cloned()
                .collect::<Vec<_>>();
            for key in &removed {
                for form in [&mut state.current, &mut state.initial] {
                    form.values.remove(key);
                    form.errors.remove(key);
                    form.touched.remove(key);
                }
                state.tickets.remove(&ValidationScope::Field(key.clone()));
            }

            state.descriptors = descriptors;
            state.descriptors.keys().cloned().collect::<Vec<_>>()
        };
        self.events.emit(FormEvent::ConfigUpdated { keys });
        Ok(())
    }

    pub fn value(&self, key: &str) -> FormResult<Option<Value>> {
        Ok(read_lock(&self.state, "reading field value")?
            .current
            .values
            .get(key)
            .cloned())
    }

    pub fn values(&self) -> FormResult<FieldValues> {
        Ok(read_lock(&self.state, "reading field values")?
            .current
            .values
            .clone())
    }

    /// Replaces one value and records a history entry. Validation, when
    /// enabled, is debounced; see [`Self::run_pending_validations`].
    /// Ignored once the manager is destroyed.
    pub fn set_value(
        &self,
        key: impl Into<FieldKey>,
        value: impl Into<Value>,
        options: SetValueOptions,
    ) -> FormResult<()> {
        let key = key.into();
        let value = value.into();
        let old_value = {
            let mut state = write_lock(&self.state, "setting field value")?;
            if state.destroyed {
                return Ok(());
            }
            let old_value = state.current.values.insert(key.clone(), value.clone());
            if options.touch {
                state.current.touched.insert(key.clone(), true);
            }
            state.record();
            old_value
        };

        if !options.silent {
            self.events.emit(FormEvent::ValueChanged {
                key: key.clone(),
                value,
                old_value,
            });
        }
        if options.validate.unwrap_or(self.options.validate_on_change) {
            self.schedule_validation(ValidationScope::Field(key))?;
        }
        Ok(())
    }

    /// Batched [`Self::set_value`] producing a single history entry.
    pub fn set_values(&self, values: FieldValues, options: SetValuesOptions) -> FormResult<()> {
        let (next, old_values) = {
            let mut guard = write_lock(&self.state, "setting field values")?;
            let state = &mut *guard;
            if state.destroyed {
                return Ok(());
            }
            let old_values = state.current.values.clone();
            if options.merge {
                state.current.values.extend(values.clone());
            } else {
                state.current.values = values.clone();
                for (key, item) in &state.descriptors {
                    if state.current.values.contains_key(key) {
                        continue;
                    }
                    if let Some(value) = self.options.default_for(item) {
                        state.current.values.insert(key.clone(), value);
                    }
                }
            }
            if options.touch {
                for key in values.keys() {
                    state.current.touched.insert(key.clone(), true);
                }
            }
            state.record();
            (state.current.values.clone(), old_values)
        };

        if !options.silent {
            self.events.emit(FormEvent::ValuesChanged {
                values: next,
                old_values,
            });
        }
        if options.validate.unwrap_or(self.options.validate_on_change) {
            self.schedule_validation(ValidationScope::All)?;
        }
        Ok(())
    }

    pub fn error(&self, key: &str) -> FormResult<Option<String>> {
        Ok(read_lock(&self.state, "reading field error")?
            .current
            .errors
            .get(key)
            .cloned())
    }

    pub fn errors(&self) -> FormResult<BTreeMap<FieldKey, String>> {
        Ok(read_lock(&self.state, "reading field errors")?
            .current
            .errors
            .clone())
    }

    /// `None` clears the field's error.
    pub fn set_error(&self, key: impl Into<FieldKey>, error: Option<String>) -> FormResult<()> {
        let key = key.into();
        {
            let mut state = write_lock(&self.state, "setting field error")?;
            apply_error(&mut state.current.errors, &key, error.clone());
        }
        self.events.emit(FormEvent::ErrorChanged { key, error });
        Ok(())
    }

    pub fn set_errors(&self, errors: BTreeMap<FieldKey, Option<String>>) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "setting field errors")?;
            for (key, error) in &errors {
                apply_error(&mut state.current.errors, key, error.clone());
            }
        }
        self.events.emit(FormEvent::ErrorsChanged { errors });
        Ok(())
    }

    /// Clears the listed keys, or every error when `keys` is `None`.
    pub fn clear_errors(&self, keys: Option<&[FieldKey]>) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "clearing field errors")?;
            match keys {
                Some(keys) => keys.iter().for_each(|key| {
                    state.current.errors.remove(key);
                }),
                None => state.current.errors.clear(),
            }
        }
        self.events.emit(FormEvent::ErrorsCleared {
            keys: keys.map(<[FieldKey]>::to_vec),
        });
        Ok(())
    }

    pub fn is_touched(&self, key: &str) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading touched flag")?
            .current
            .touched
            .get(key)
            .copied()
            .unwrap_or(false))
    }

    pub fn set_touched(&self, key: impl Into<FieldKey>, touched: bool) -> FormResult<()> {
        let key = key.into();
        write_lock(&self.state, "setting touched flag")?
            .current
            .touched
            .insert(key.clone(), touched);
        self.events.emit(FormEvent::TouchedChanged { key, touched });
        Ok(())
    }

    pub fn set_touched_fields(&self, touched: BTreeMap<FieldKey, bool>) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "setting touched flags")?;
            for (key, flag) in &touched {
                state.current.touched.insert(key.clone(), *flag);
            }
        }
        for (key, touched) in touched {
            self.events.emit(FormEvent::TouchedChanged { key, touched });
        }
        Ok(())
    }

    pub fn touch_all(&self) -> FormResult<()> {
        {
            let mut guard = write_lock(&self.state, "touching all fields")?;
            let state = &mut *guard;
            for key in state.descriptors.keys() {
                state.current.touched.insert(key.clone(), true);
            }
        }
        self.events.emit(FormEvent::AllTouched);
        Ok(())
    }

    /// Marks the listed keys, or every field when `keys` is `None`, as
    /// untouched.
    pub fn reset_touched(&self, keys: Option<&[FieldKey]>) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "resetting touched flags")?;
            match keys {
                Some(keys) => {
                    for key in keys {
                        state.current.touched.insert(key.clone(), false);
                    }
                }
                None => state
                    .current
                    .touched
                    .values_mut()
                    .for_each(|flag| *flag = false),
            }
        }
        self.events.emit(FormEvent::TouchedReset {
            keys: keys.map(<[FieldKey]>::to_vec),
        });
        Ok(())
    }

    pub fn is_valid(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "checking form validity")?
            .current
            .errors
            .is_empty())
    }

    /// Deep comparison of the current values against the baseline captured
    /// at construction or the last `reset(Some(..))`.
    pub fn is_dirty(&self) -> FormResult<bool> {
        let state = read_lock(&self.state, "checking dirty state")?;
        Ok(state.current.values != state.initial.values)
    }

    pub fn is_field_dirty(&self, key: &str) -> FormResult<bool> {
        let state = read_lock(&self.state, "checking field dirty state")?;
        Ok(state.current.values.get(key) != state.initial.values.get(key))
    }

    /// A copy of the live state; edits to it do not reach the manager.
    pub fn state(&self) -> FormResult<FormState> {
        Ok(read_lock(&self.state, "reading form state")?.current.clone())
    }

    pub fn set_state(&self, patch: StatePatch) -> FormResult<()> {
        let state = {
            let mut state = write_lock(&self.state, "replacing form state")?;
            if state.destroyed {
                return Ok(());
            }
            if let Some(values) = patch.values {
                state.current.values = values;
            }
            if let Some(errors) = patch.errors {
                state.current.errors = errors;
            }
            if let Some(touched) = patch.touched {
                state.current.touched = touched;
            }
            state.record();
            state.current.clone()
        };
        self.events.emit(FormEvent::StateChanged { state });
        Ok(())
    }

    /// Restores the baseline state. `Some(values)` are layered over the
    /// descriptor defaults and become the new baseline. Pending debounced
    /// validations are cancelled.
    pub fn reset(&self, values: Option<FieldValues>) -> FormResult<()> {
        let state = {
            let mut guard = write_lock(&self.state, "resetting form state")?;
            let state = &mut *guard;
            if state.destroyed {
                return Ok(());
            }
            if let Some(values) = values {
                let mut baseline = initial_state(&state.descriptors, &self.options);
                baseline.values.extend(values);
                state.initial = baseline;
            }
            state.current = state.initial.clone();
            state.tickets.clear();
            state.record();
            state.current.clone()
        };
        self.events.emit(FormEvent::Reset { state });
        Ok(())
    }

    pub fn undo(&self) -> FormResult<bool> {
        let snapshot = {
            let mut state = write_lock(&self.state, "undoing form change")?;
            let Some(snapshot) = state.history.undo().cloned() else {
                return Ok(false);
            };
            state.current = snapshot.to_state();
            tracing::debug!(cursor = ?state.history.cursor(), "undo");
            snapshot
        };
        self.events.emit(FormEvent::StateRestored {
            snapshot: snapshot.clone(),
        });
        self.events.emit(FormEvent::Undo { snapshot });
        Ok(true)
    }

    pub fn redo(&self) -> FormResult<bool> {
        let snapshot = {
            let mut state = write_lock(&self.state, "redoing form change")?;
            let Some(snapshot) = state.history.redo().cloned() else {
                return Ok(false);
            };
            state.current = snapshot.to_state();
            tracing::debug!(cursor = ?state.history.cursor(), "redo");
            snapshot
        };
        self.events.emit(FormEvent::StateRestored {
            snapshot: snapshot.clone(),
        });
        self.events.emit(FormEvent::Redo { snapshot });
        Ok(true)
    }

    pub fn can_undo(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "checking undo")?.history.can_undo())
    }

    pub fn can_redo(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "checking redo")?.history.can_redo())
    }

    pub fn history(&self) -> FormResult<Vec<StateSnapshot>> {
        Ok(read_lock(&self.state, "reading history")?.history.entries())
    }

    pub fn history_index(&self) -> FormResult<Option<usize>> {
        Ok(read_lock(&self.state, "reading history cursor")?
            .history
            .cursor())
    }

    /// Drops every snapshot and starts over from the current state.
    pub fn clear_history(&self) -> FormResult<()> {
        let mut state = write_lock(&self.state, "clearing history")?;
        state.history.clear();
        state.record();
        Ok(())
    }

    /// Cancels pending validations, drops history, global rules and every
    /// listener. Later value mutations and scheduling requests are ignored.
    pub fn destroy(&self) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "destroying form state")?;
            state.destroyed = true;
            state.tickets.clear();
            state.history.clear();
        }
        write_lock(&self.rules, "dropping validation rules")?.clear();
        mutex_lock(&self.pending, "dropping pending validations")?.clear();
        self.events.remove_all_listeners();
        Ok(())
    }

    pub fn is_destroyed(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading destroyed flag")?.destroyed)
    }
}

fn initial_state(
    descriptors: &IndexMap<FieldKey, FormItemDescriptor>,
    options: &FormStateOptions,
) -> FormState {
    let mut state = FormState::default();
    for (key, item) in descriptors {
        if let Some(value) = options.initial_for(item) {
            state.values.insert(key.clone(), value);
        }
        state.touched.insert(key.clone(), false);
    }
    state
}

fn apply_error(errors: &mut BTreeMap<FieldKey, String>, key: &FieldKey, error: Option<String>) {
    match error {
        Some(message) => {
            errors.insert(key.clone(), message);
        }
        None => {
            errors.remove(key);
        }
    }
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    context: &'static str,
) -> FormResult<MutexGuard<'a, T>> {
    lock.lock().map_err(|_| FormError::StatePoisoned(context))
}
