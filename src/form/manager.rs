use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::controller::{FormResult, FormState, FormStateManager, FormStateOptions, SetValueOptions};
use super::events::{FormEvent, FormEventKind};
use super::rules::ValidationRule;
use super::store::{FormStateStore, GroupState, InMemoryFormStore, PersistedFormState};
use crate::descriptor::{FieldKey, FieldValues, FormItemDescriptor, dedupe_last_wins};
use crate::event::{Event, EventEmitter};
use crate::layout::{LayoutCalculator, LayoutEvent, LayoutEventKind, LayoutOptions, LayoutResult};

pub const DEFAULT_GROUP: &str = "default";
pub const DEFAULT_STORAGE_KEY: &str = "form-state";

/// Consumer of layout and state snapshots. Edits flow back through
/// [`FormManager`], never into the snapshots.
pub trait FormRenderer: Send {
    fn render(&mut self, layout: &LayoutResult, state: &FormState);
}

impl<F> FormRenderer for F
where
    F: FnMut(&LayoutResult, &FormState) + Send,
{
    fn render(&mut self, layout: &LayoutResult, state: &FormState) {
        self(layout, state)
    }
}

#[derive(Clone, Debug, Default)]
pub struct FormConfig {
    pub items: Vec<FormItemDescriptor>,
    pub layout: LayoutOptions,
    /// Rules applied on top of each descriptor's own rules.
    pub rules: BTreeMap<FieldKey, Vec<ValidationRule>>,
}

impl FormConfig {
    pub fn new(items: Vec<FormItemDescriptor>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn layout(mut self, layout: LayoutOptions) -> Self {
        self.layout = layout;
        self
    }

    pub fn rule(mut self, key: impl Into<FieldKey>, rule: ValidationRule) -> Self {
        self.rules.entry(key.into()).or_default().push(rule);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormManagerOptions {
    /// When off, [`FormManager::resize`] is ignored and the host sizes the
    /// form through [`FormManager::set_container_size`].
    pub auto_resize: bool,
    pub auto_validate: bool,
    pub persist_state: bool,
    pub storage_key: String,
    pub enable_groups: bool,
    pub enable_expand_collapse: bool,
    pub state: FormStateOptions,
}

impl Default for FormManagerOptions {
    fn default() -> Self {
        Self {
            auto_resize: true,
            auto_validate: true,
            persist_state: false,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            enable_groups: true,
            enable_expand_collapse: true,
            state: FormStateOptions::default(),
        }
    }
}

impl FormManagerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_resize(mut self, enabled: bool) -> Self {
        self.auto_resize = enabled;
        self
    }

    pub fn auto_validate(mut self, enabled: bool) -> Self {
        self.auto_validate = enabled;
        self
    }

    pub fn persist_state(mut self, storage_key: impl Into<String>) -> Self {
        self.persist_state = true;
        self.storage_key = storage_key.into();
        self
    }

    pub fn enable_groups(mut self, enabled: bool) -> Self {
        self.enable_groups = enabled;
        self
    }

    pub fn enable_expand_collapse(mut self, enabled: bool) -> Self {
        self.enable_expand_collapse = enabled;
        self
    }

    pub fn state(mut self, state: FormStateOptions) -> Self {
        self.state = state;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FormGroup {
    pub id: String,
    pub keys: Vec<FieldKey>,
    pub expanded: bool,
    pub visible: bool,
}

impl FormGroup {
    fn flags(&self) -> GroupState {
        GroupState {
            expanded: self.expanded,
            visible: self.visible,
        }
    }

    fn shows_items(&self) -> bool {
        self.visible && self.expanded
    }
}

#[derive(Clone, Debug)]
pub enum FormManagerEvent {
    LayoutUpdated(Arc<LayoutResult>),
    StateChanged(FormState),
    FieldChanged {
        key: FieldKey,
        value: Value,
        old_value: Option<Value>,
    },
    FieldFocused {
        key: FieldKey,
    },
    FieldBlurred {
        key: FieldKey,
    },
    FieldValidated {
        key: FieldKey,
        error: Option<String>,
    },
    FormValidated {
        errors: BTreeMap<FieldKey, Option<String>>,
        valid: bool,
    },
    ExpandToggled {
        expanded: bool,
    },
    GroupToggled {
        group: String,
        expanded: bool,
        visible: bool,
    },
    ConfigUpdated,
    Destroyed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum FormManagerEventKind {
    LayoutUpdated,
    StateChanged,
    FieldChanged,
    FieldFocused,
    FieldBlurred,
    FieldValidated,
    FormValidated,
    ExpandToggled,
    GroupToggled,
    ConfigUpdated,
    Destroyed,
}

impl Event for FormManagerEvent {
    type Kind = FormManagerEventKind;

    fn kind(&self) -> FormManagerEventKind {
        match self {
            FormManagerEvent::LayoutUpdated(_) => FormManagerEventKind::LayoutUpdated,
            FormManagerEvent::StateChanged(_) => FormManagerEventKind::StateChanged,
            FormManagerEvent::FieldChanged { .. } => FormManagerEventKind::FieldChanged,
            FormManagerEvent::FieldFocused { .. } => FormManagerEventKind::FieldFocused,
            FormManagerEvent::FieldBlurred { .. } => FormManagerEventKind::FieldBlurred,
            FormManagerEvent::FieldValidated { .. } => FormManagerEventKind::FieldValidated,
            FormManagerEvent::FormValidated { .. } => FormManagerEventKind::FormValidated,
            FormManagerEvent::ExpandToggled { .. } => FormManagerEventKind::ExpandToggled,
            FormManagerEvent::GroupToggled { .. } => FormManagerEventKind::GroupToggled,
            FormManagerEvent::ConfigUpdated => FormManagerEventKind::ConfigUpdated,
            FormManagerEvent::Destroyed => FormManagerEventKind::Destroyed,
        }
    }
}

/// Wires a [`LayoutCalculator`] and a [`FormStateManager`] to a renderer and
/// an optional persistence store.
pub struct FormManager<R, S = InMemoryFormStore> {
    options: FormManagerOptions,
    config: FormConfig,
    layout: LayoutCalculator,
    state: FormStateManager,
    renderer: R,
    store: Option<S>,
    expanded: bool,
    groups: IndexMap<String, FormGroup>,
    events: EventEmitter<FormManagerEvent>,
    destroyed: bool,
}

impl<R: FormRenderer> FormManager<R, InMemoryFormStore> {
    pub fn new(config: FormConfig, options: FormManagerOptions, renderer: R) -> FormResult<Self> {
        Self::build(config, options, renderer, None)
    }
}

impl<R, S> FormManager<R, S>
where
    R: FormRenderer,
    S: FormStateStore,
{
    /// Restores persisted values, expand flag and group flags from `store`
    /// when `persist_state` is on.
    pub fn with_store(
        config: FormConfig,
        options: FormManagerOptions,
        renderer: R,
        store: S,
    ) -> FormResult<Self> {
        Self::build(config, options, renderer, Some(store))
    }

    fn build(
        config: FormConfig,
        options: FormManagerOptions,
        renderer: R,
        store: Option<S>,
    ) -> FormResult<Self> {
        let persisted = match store.as_ref() {
            Some(store) if options.persist_state => {
                match PersistedFormState::load_from(store, &options.storage_key) {
                    Ok(persisted) => persisted,
                    Err(error) => {
                        tracing::warn!(
                            %error,
                            storage_key = %options.storage_key,
                            "persisted form state ignored"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        let mut state_options = options.state.clone();
        if let Some(persisted) = &persisted {
            state_options
                .initial_values
                .extend(persisted.values.clone());
        }
        let state = FormStateManager::new(config.items.clone(), state_options);
        register_rules(&state, &config.rules)?;

        let expanded = if options.enable_expand_collapse {
            persisted
                .as_ref()
                .map_or(!config.layout.collapsed, |persisted| persisted.expanded)
        } else {
            true
        };
        let mut layout = LayoutCalculator::new(config.layout.clone());
        layout.set_collapsed(!expanded);

        let events = EventEmitter::new();
        forward_events(&layout, &state, &events);

        let groups = build_groups(
            &config.items,
            &IndexMap::new(),
            persisted.as_ref().map(|persisted| &persisted.groups),
        );
        let mut manager = Self {
            options,
            config,
            layout,
            state,
            renderer,
            store,
            expanded,
            groups,
            events,
            destroyed: false,
        };
        manager.relayout();
        manager.render()?;
        Ok(manager)
    }

    pub fn events(&self) -> &EventEmitter<FormManagerEvent> {
        &self.events
    }

    pub fn options(&self) -> &FormManagerOptions {
        &self.options
    }

    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    pub fn state_manager(&self) -> &FormStateManager {
        &self.state
    }

    pub fn layout(&self) -> &LayoutCalculator {
        &self.layout
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn store(&self) -> Option<&S> {
        self.store.as_ref()
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn groups(&self) -> impl Iterator<Item = &FormGroup> {
        self.groups.values()
    }

    pub fn group(&self, id: &str) -> Option<&FormGroup> {
        self.groups.get(id)
    }

    pub fn values(&self) -> FormResult<FieldValues> {
        self.state.values()
    }

    pub fn state(&self) -> FormResult<FormState> {
        self.state.state()
    }

    /// Entry point for a resize observer. Ignored when `auto_resize` is off.
    pub fn resize(&mut self, width: f32, height: Option<f32>) -> FormResult<bool> {
        if !self.options.auto_resize {
            tracing::debug!(width, "resize ignored, auto_resize is off");
            return Ok(false);
        }
        self.set_container_size(width, height)
    }

    /// Returns `false` when the width did not change.
    pub fn set_container_size(&mut self, width: f32, height: Option<f32>) -> FormResult<bool> {
        if self.destroyed || !self.layout.update_container_size(width, height) {
            return Ok(false);
        }
        self.render()?;
        Ok(true)
    }

    pub fn set_field_value(
        &mut self,
        key: impl Into<FieldKey>,
        value: impl Into<Value>,
    ) -> FormResult<()> {
        let key = key.into();
        let value = value.into();
        let old_value = self.state.value(key.as_str())?;
        let validate = self.options.auto_validate && self.state.options().validate_on_change;
        self.state.set_value(
            key.clone(),
            value.clone(),
            SetValueOptions::new().validate(validate),
        )?;
        self.events.emit(FormManagerEvent::FieldChanged {
            key,
            value,
            old_value,
        });
        self.state_changed()
    }

    pub fn focus_field(&self, key: impl Into<FieldKey>) {
        self.events
            .emit(FormManagerEvent::FieldFocused { key: key.into() });
    }

    /// Marks the field touched and, with validate-on-blur, queues its
    /// validation.
    pub fn blur_field(&mut self, key: impl Into<FieldKey>) -> FormResult<()> {
        let key = key.into();
        self.state.set_touched(key.clone(), true)?;
        self.events
            .emit(FormManagerEvent::FieldBlurred { key: key.clone() });
        if self.options.auto_validate && self.state.options().validate_on_blur {
            self.state.validate_field_debounced(key)?;
        }
        self.render()
    }

    /// Returns `false` when nothing changed.
    pub fn set_expanded(&mut self, expanded: bool) -> FormResult<bool> {
        if self.destroyed || !self.options.enable_expand_collapse || self.expanded == expanded {
            return Ok(false);
        }
        self.expanded = expanded;
        self.layout.set_collapsed(!expanded);
        self.events
            .emit(FormManagerEvent::ExpandToggled { expanded });
        self.persist();
        self.render()?;
        Ok(true)
    }

    /// Returns the new expanded flag.
    pub fn toggle_expand(&mut self) -> FormResult<bool> {
        self.set_expanded(!self.expanded)?;
        Ok(self.expanded)
    }

    pub fn toggle_group(&mut self, id: &str) -> FormResult<bool> {
        self.update_group(id, |group| group.expanded = !group.expanded)
    }

    pub fn set_group_expanded(&mut self, id: &str, expanded: bool) -> FormResult<bool> {
        self.update_group(id, |group| group.expanded = expanded)
    }

    pub fn set_group_visible(&mut self, id: &str, visible: bool) -> FormResult<bool> {
        self.update_group(id, |group| group.visible = visible)
    }

    /// Applies a new configuration. Surviving keys keep their values and
    /// surviving groups keep their flags.
    pub fn update_config(&mut self, config: FormConfig) -> FormResult<()> {
        if self.destroyed {
            return Ok(());
        }
        self.state.update_config(config.items.clone())?;
        self.state.clear_rules(None)?;
        register_rules(&self.state, &config.rules)?;
        self.groups = build_groups(&config.items, &self.groups, None);
        self.layout.update_options(config.layout.clone());
        self.config = config;
        self.relayout();
        self.events.emit(FormManagerEvent::ConfigUpdated);
        self.render()
    }

    pub async fn validate(&mut self) -> FormResult<bool> {
        let errors = self.state.validate_all().await?;
        self.render()?;
        Ok(errors.values().all(Option::is_none))
    }

    pub async fn validate_field(&mut self, key: &str) -> FormResult<Option<String>> {
        let error = self.state.validate_field(key).await?;
        self.render()?;
        Ok(error)
    }

    /// Drives queued debounced validations, then re-renders.
    pub async fn run_pending_validations(&mut self) -> FormResult<()> {
        self.state.run_pending_validations().await?;
        self.render()
    }

    pub fn undo(&mut self) -> FormResult<bool> {
        let moved = self.state.undo()?;
        if moved {
            self.state_changed()?;
        }
        Ok(moved)
    }

    pub fn redo(&mut self) -> FormResult<bool> {
        let moved = self.state.redo()?;
        if moved {
            self.state_changed()?;
        }
        Ok(moved)
    }

    pub fn reset(&mut self, values: Option<FieldValues>) -> FormResult<()> {
        self.state.reset(values)?;
        self.state_changed()
    }

    pub fn render(&mut self) -> FormResult<()> {
        if self.destroyed {
            return Ok(());
        }
        let state = self.state.state()?;
        let layout = self.layout.result();
        self.renderer.render(&layout, &state);
        Ok(())
    }

    pub fn clear_persisted_state(&self) -> FormResult<()> {
        match self.store.as_ref() {
            Some(store) => PersistedFormState::clear_from(store, &self.options.storage_key),
            None => Ok(()),
        }
    }

    pub fn destroy(&mut self) -> FormResult<()> {
        if self.destroyed {
            return Ok(());
        }
        self.state.destroy()?;
        self.layout.destroy();
        self.events.emit(FormManagerEvent::Destroyed);
        self.events.remove_all_listeners();
        self.destroyed = true;
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn update_group(&mut self, id: &str, change: impl FnOnce(&mut FormGroup)) -> FormResult<bool> {
        if self.destroyed || !self.options.enable_groups {
            return Ok(false);
        }
        let Some(group) = self.groups.get_mut(id) else {
            tracing::debug!(group = id, "unknown group");
            return Ok(false);
        };
        let before = group.flags();
        change(group);
        let after = group.flags();
        if before == after {
            return Ok(false);
        }
        self.events.emit(FormManagerEvent::GroupToggled {
            group: id.to_string(),
            expanded: after.expanded,
            visible: after.visible,
        });
        self.relayout();
        self.persist();
        self.render()?;
        Ok(true)
    }

    fn state_changed(&mut self) -> FormResult<()> {
        let state = self.state.state()?;
        self.events.emit(FormManagerEvent::StateChanged(state));
        self.persist();
        self.render()
    }

    fn relayout(&mut self) {
        let items = self.visible_items();
        self.layout.update_items(items);
    }

    fn visible_items(&self) -> Vec<FormItemDescriptor> {
        if !self.options.enable_groups {
            return self.config.items.clone();
        }
        self.config
            .items
            .iter()
            .filter(|item| {
                self.groups
                    .get(group_id(item))
                    .is_none_or(FormGroup::shows_items)
            })
            .cloned()
            .collect()
    }

    fn persist(&self) {
        if !self.options.persist_state {
            return;
        }
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let values = match self.state.values() {
            Ok(values) => values,
            Err(error) => {
                tracing::warn!(%error, "form state not persisted");
                return;
            }
        };
        let payload = PersistedFormState {
            values,
            expanded: self.expanded,
            groups: self
                .groups
                .iter()
                .map(|(id, group)| (id.clone(), group.flags()))
                .collect(),
        };
        if let Err(error) = payload.save_to(store, &self.options.storage_key) {
            tracing::warn!(
                %error,
                storage_key = %self.options.storage_key,
                "form state not persisted"
            );
        }
    }
}

fn group_id(item: &FormItemDescriptor) -> &str {
    item.group.as_deref().unwrap_or(DEFAULT_GROUP)
}

fn register_rules(
    state: &FormStateManager,
    rules: &BTreeMap<FieldKey, Vec<ValidationRule>>,
) -> FormResult<()> {
    for (key, rules) in rules {
        for rule in rules {
            state.register_rule(key.clone(), rule.clone())?;
        }
    }
    Ok(())
}

fn build_groups(
    items: &[FormItemDescriptor],
    previous: &IndexMap<String, FormGroup>,
    persisted: Option<&BTreeMap<String, GroupState>>,
) -> IndexMap<String, FormGroup> {
    let mut groups = IndexMap::<String, FormGroup>::new();
    for item in dedupe_last_wins(items).values() {
        let id = group_id(item);
        if !groups.contains_key(id) {
            let flags = previous
                .get(id)
                .map(FormGroup::flags)
                .or_else(|| persisted.and_then(|persisted| persisted.get(id).copied()))
                .unwrap_or_default();
            groups.insert(
                id.to_string(),
                FormGroup {
                    id: id.to_string(),
                    keys: Vec::new(),
                    expanded: flags.expanded,
                    visible: flags.visible,
                },
            );
        }
        if let Some(group) = groups.get_mut(id) {
            group.keys.push(item.key.clone());
        }
    }
    groups
}

fn forward_events(
    layout: &LayoutCalculator,
    state: &FormStateManager,
    events: &EventEmitter<FormManagerEvent>,
) {
    let sink = events.clone();
    layout
        .events()
        .on(LayoutEventKind::PositionsUpdated, move |event| {
            if let LayoutEvent::PositionsUpdated(result) = event {
                sink.emit(FormManagerEvent::LayoutUpdated(result.clone()));
            }
        });

    let sink = events.clone();
    state
        .events()
        .on(FormEventKind::FieldValidated, move |event| {
            if let FormEvent::FieldValidated { key, error } = event {
                sink.emit(FormManagerEvent::FieldValidated {
                    key: key.clone(),
                    error: error.clone(),
                });
            }
        });

    let sink = events.clone();
    state
        .events()
        .on(FormEventKind::FormValidated, move |event| {
            if let FormEvent::FormValidated { errors, valid } = event {
                sink.emit(FormManagerEvent::FormValidated {
                    errors: errors.clone(),
                    valid: *valid,
                });
            }
        });
}
