pub use crate::descriptor::{FieldKey, FieldType, FieldValues, FormItemDescriptor};
pub use crate::event::{Event, EventEmitter, ListenOptions, Subscription, WaitError};
pub use crate::form::{
    BuiltinRule, FormConfig, FormError, FormEvent, FormEventKind, FormManager, FormManagerEvent,
    FormManagerEventKind, FormManagerOptions, FormRenderer, FormResult, FormState,
    FormStateManager, FormStateOptions, FormStateStore, InMemoryFormStore, RuleError,
    SetValueOptions, SetValuesOptions, StatePatch, StateSnapshot, ValidationRule,
};
pub use crate::layout::{
    Breakpoint, BreakpointName, ItemPosition, LayoutCalculator, LayoutEvent, LayoutEventKind,
    LayoutOptions, LayoutResult,
};
