use std::collections::BTreeMap;

use futures::FutureExt;
use futures::future::join_all;
use futures_timer::Delay;
use serde_json::Value;

use super::coerce::is_empty_value;
use super::controller::{
    FormResult, FormStateManager, ValidationTicket, mutex_lock, read_lock, write_lock,
};
use super::events::FormEvent;
use super::rules::ValidationRule;
use crate::descriptor::{FieldKey, FieldValues, FormItemDescriptor};

/// What a debounced validation request covers. Requests only supersede
/// earlier requests for the same scope.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum ValidationScope {
    All,
    Field(FieldKey),
}

impl FormStateManager {
    /// Adds a rule that runs after the descriptor's own rules for `key`.
    pub fn register_rule(&self, key: impl Into<FieldKey>, rule: ValidationRule) -> FormResult<()> {
        write_lock(&self.rules, "registering validation rule")?
            .entry(key.into())
            .or_default()
            .push(rule);
        Ok(())
    }

    /// Removes global rules for `key`, or for every key when `None`.
    pub fn clear_rules(&self, key: Option<&str>) -> FormResult<()> {
        let mut rules = write_lock(&self.rules, "clearing validation rules")?;
        match key {
            Some(key) => {
                rules.remove(key);
            }
            None => rules.clear(),
        }
        Ok(())
    }

    /// Runs required-ness, then the descriptor rules, then global rules, and
    /// stores the first failure. Keys without a descriptor yield `None`.
    pub async fn validate_field(&self, key: &str) -> FormResult<Option<String>> {
        let (descriptor, value, values) = {
            let state = read_lock(&self.state, "reading field for validation")?;
            let Some(descriptor) = state.descriptors.get(key).cloned() else {
                return Ok(None);
            };
            let value = state
                .current
                .values
                .get(key)
                .cloned()
                .unwrap_or(Value::Null);
            (descriptor, value, state.current.values.clone())
        };
        let global = read_lock(&self.rules, "reading validation rules")?
            .get(key)
            .cloned()
            .unwrap_or_default();

        let error = first_failure(&descriptor, &value, &values, &global).await;
        let key = descriptor.key;
        // Written even when a newer value arrived meanwhile.
        self.set_error(key.clone(), error.clone())?;
        self.events.emit(FormEvent::FieldValidated {
            key,
            error: error.clone(),
        });
        Ok(error)
    }

    /// Validates every field concurrently and returns each field's outcome.
    pub async fn validate_all(&self) -> FormResult<BTreeMap<FieldKey, Option<String>>> {
        let keys = read_lock(&self.state, "listing fields for validation")?
            .descriptors
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        let outcomes = join_all(keys.iter().map(|key| self.validate_field(key.as_str()))).await;

        let mut errors = BTreeMap::new();
        for (key, outcome) in keys.into_iter().zip(outcomes) {
            errors.insert(key, outcome?);
        }
        let valid = self.is_valid()?;
        self.events.emit(FormEvent::FormValidated {
            errors: errors.clone(),
            valid,
        });
        Ok(errors)
    }

    /// Queues a debounced validation of `key`, replacing any queued one that
    /// has not started yet.
    pub fn validate_field_debounced(&self, key: impl Into<FieldKey>) -> FormResult<()> {
        self.schedule_validation(ValidationScope::Field(key.into()))
    }

    /// Drives queued debounced validations until none remain.
    pub async fn run_pending_validations(&self) -> FormResult<()> {
        loop {
            let batch = std::mem::take(&mut *mutex_lock(
                &self.pending,
                "draining pending validations",
            )?);
            if batch.is_empty() {
                return Ok(());
            }
            join_all(batch.into_values()).await;
        }
    }

    /// Number of queued requests; a superseded request is not counted.
    pub fn pending_validations(&self) -> FormResult<usize> {
        Ok(mutex_lock(&self.pending, "counting pending validations")?.len())
    }

    pub(crate) fn schedule_validation(&self, scope: ValidationScope) -> FormResult<()> {
        let ticket = {
            let mut state = write_lock(&self.state, "scheduling validation")?;
            if state.destroyed {
                return Ok(());
            }
            state.next_ticket += 1;
            let ticket = ValidationTicket(state.next_ticket);
            state.tickets.insert(scope.clone(), ticket);
            ticket
        };

        // The window starts now, not when the host first polls the queue.
        let window = Delay::new(self.options.validation_delay);
        let handle = self.downgrade();
        let queued = scope.clone();
        let task = async move {
            window.await;
            let Some(manager) = handle.upgrade() else {
                return;
            };
            match manager.is_latest_ticket(&scope, ticket) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(?scope, "debounced validation superseded");
                    return;
                }
                Err(error) => {
                    tracing::warn!(%error, ?scope, "debounced validation dropped");
                    return;
                }
            }
            tracing::debug!(?scope, "debounced validation started");
            let outcome = match &scope {
                ValidationScope::Field(key) => manager.validate_field(key.as_str()).await.map(drop),
                ValidationScope::All => manager.validate_all().await.map(drop),
            };
            if let Err(error) = outcome {
                tracing::warn!(%error, ?scope, "debounced validation failed");
            }
        };
        // Replacing a queued request drops it before it ever runs.
        if mutex_lock(&self.pending, "queueing validation")?
            .insert(queued, task.boxed())
            .is_some()
        {
            tracing::debug!("queued validation replaced");
        }
        Ok(())
    }

    fn is_latest_ticket(&self, scope: &ValidationScope, ticket: ValidationTicket) -> FormResult<bool> {
        let state = read_lock(&self.state, "checking latest validation ticket")?;
        Ok(!state.destroyed && state.tickets.get(scope).copied() == Some(ticket))
    }
}

async fn first_failure(
    descriptor: &FormItemDescriptor,
    value: &Value,
    values: &FieldValues,
    global: &[ValidationRule],
) -> Option<String> {
    if is_empty_value(value) {
        return descriptor
            .required
            .then(|| format!("{} is required", descriptor.display_name()));
    }
    for rule in descriptor.rules.iter().chain(global) {
        if let Some(message) = rule.evaluate(value, values).await {
            return Some(message);
        }
    }
    None
}
