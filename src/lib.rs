pub mod descriptor;
pub mod event;
pub mod form;
pub mod layout;
pub mod prelude;

pub use descriptor::{FieldKey, FieldType, FieldValues, FormItemDescriptor};
pub use event::{Event, EventEmitter};
pub use form::{FormManager, FormStateManager};
pub use layout::LayoutCalculator;
