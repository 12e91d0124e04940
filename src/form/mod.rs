mod coerce;
mod controller;
mod events;
mod history;
mod manager;
mod rules;
mod store;
mod validation;


pub use coerce::{is_empty_value, to_display_string, to_number, utf16_len};
pub use controller::{
    FormError, FormResult, FormState, FormStateManager, FormStateOptions,
    SetValueOptions, SetValuesOptions, StatePatch, ValidationTicket,
};
pub use events::{FormEvent, FormEventKind};
pub use history::{DEFAULT_MAX_HISTORY, History, StateSnapshot};
pub use manager::{
    DEFAULT_GROUP, DEFAULT_STORAGE_KEY, FormConfig, FormGroup, FormManager, FormManagerEvent,
    FormManagerEventKind, FormManagerOptions, FormRenderer,
};
pub use rules::{BuiltinRule, CheckFn, PredicateFn, RuleError, ValidationRule};
pub use store::{FormStateStore, GroupState, InMemoryFormStore, PersistedFormState};
