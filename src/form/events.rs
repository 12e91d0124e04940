use std::collections::BTreeMap;

use serde_json::Value;

use super::controller::FormState;
use super::history::StateSnapshot;
use crate::descriptor::{FieldKey, FieldValues};
use crate::event::Event;

#[derive(Clone, Debug, PartialEq)]
pub enum FormEvent {
    ValueChanged {
        key: FieldKey,
        value: Value,
        old_value: Option<Value>,
    },
    ValuesChanged {
        values: FieldValues,
        old_values: FieldValues,
    },
    ErrorChanged {
        key: FieldKey,
        error: Option<String>,
    },
    ErrorsChanged {
        errors: BTreeMap<FieldKey, Option<String>>,
    },
    /// `None` means every error was cleared.
    ErrorsCleared {
        keys: Option<Vec<FieldKey>>,
    },
    TouchedChanged {
        key: FieldKey,
        touched: bool,
    },
    AllTouched,
    TouchedReset {
        keys: Option<Vec<FieldKey>>,
    },
    FieldValidated {
        key: FieldKey,
        error: Option<String>,
    },
    FormValidated {
        errors: BTreeMap<FieldKey, Option<String>>,
        valid: bool,
    },
    StateChanged {
        state: FormState,
    },
    Reset {
        state: FormState,
    },
    StateRestored {
        snapshot: StateSnapshot,
    },
    Undo {
        snapshot: StateSnapshot,
    },
    Redo {
        snapshot: StateSnapshot,
    },
    ConfigUpdated {
        keys: Vec<FieldKey>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum FormEventKind {
    ValueChanged,
    ValuesChanged,
    ErrorChanged,
    ErrorsChanged,
    ErrorsCleared,
    TouchedChanged,
    AllTouched,
    TouchedReset,
    FieldValidated,
    FormValidated,
    StateChanged,
    Reset,
    StateRestored,
    Undo,
    Redo,
    ConfigUpdated,
}

impl Event for FormEvent {
    type Kind = FormEventKind;

    fn kind(&self) -> FormEventKind {
        match self {
            FormEvent::ValueChanged { .. } => FormEventKind::ValueChanged,
            FormEvent::ValuesChanged { .. } => FormEventKind::ValuesChanged,
            FormEvent::ErrorChanged { .. } => FormEventKind::ErrorChanged,
            FormEvent::ErrorsChanged { .. } => FormEventKind::ErrorsChanged,
            FormEvent::ErrorsCleared { .. } => FormEventKind::ErrorsCleared,
            FormEvent::TouchedChanged { .. } => FormEventKind::TouchedChanged,
            FormEvent::AllTouched => FormEventKind::AllTouched,
            FormEvent::TouchedReset { .. } => FormEventKind::TouchedReset,
            FormEvent::FieldValidated { .. } => FormEventKind::FieldValidated,
            FormEvent::FormValidated { .. } => FormEventKind::FormValidated,
            FormEvent::StateChanged { .. } => FormEventKind::StateChanged,
            FormEvent::Reset { .. } => FormEventKind::Reset,
            FormEvent::StateRestored { .. } => FormEventKind::StateRestored,
            FormEvent::Undo { .. } => FormEventKind::Undo,
            FormEvent::Redo { .. } => FormEventKind::Redo,
            FormEvent::ConfigUpdated { .. } => FormEventKind::ConfigUpdated,
        }
    }
}
