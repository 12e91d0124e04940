use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::form::ValidationRule;
use crate::layout::BreakpointName;

/// Stable, form-unique field identifier.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldKey(Arc<str>);

impl FieldKey {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for FieldKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for FieldKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

impl Borrow<str> for FieldKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FieldKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&FieldKey> for FieldKey {
    fn from(value: &FieldKey) -> Self {
        value.clone()
    }
}

pub type FieldValues = BTreeMap<FieldKey, Value>;

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Input,
    Textarea,
    Select,
    Radio,
    Checkbox,
    Switch,
    Date,
    Time,
    DateTime,
    Number,
    Custom(String),
}

impl FieldType {
    pub fn default_value(&self) -> Value {
        match self {
            FieldType::Checkbox | FieldType::Switch => Value::Bool(false),
            _ => Value::String(String::new()),
        }
    }

    pub fn is_compact(&self) -> bool {
        matches!(self, FieldType::Checkbox | FieldType::Switch)
    }

    pub fn is_multiline(&self) -> bool {
        matches!(self, FieldType::Textarea)
    }
}

/// Static description of one form field. A fresh list is supplied on every
/// configuration change.
#[derive(Clone, Debug)]
pub struct FormItemDescriptor {
    pub key: FieldKey,
    pub label: Option<String>,
    pub field_type: FieldType,
    pub span: Option<usize>,
    pub responsive: BTreeMap<BreakpointName, usize>,
    pub default_value: Option<Value>,
    pub required: bool,
    pub rules: Vec<ValidationRule>,
    pub group: Option<String>,
    pub hidden: bool,
}

impl FormItemDescriptor {
    pub fn new(key: impl Into<FieldKey>, field_type: FieldType) -> Self {
        Self {
            key: key.into(),
            label: None,
            field_type,
            span: None,
            responsive: BTreeMap::new(),
            default_value: None,
            required: false,
            rules: Vec::new(),
            group: None,
            hidden: false,
        }
    }

    pub fn input(key: impl Into<FieldKey>) -> Self {
        Self::new(key, FieldType::Input)
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn span(mut self, span: usize) -> Self {
        self.span = Some(span);
        self
    }

    pub fn responsive(mut self, breakpoint: BreakpointName, span: usize) -> Self {
        self.responsive.insert(breakpoint, span);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(self.key.as_str())
    }
}

/// Indexes descriptors by key. A key that appears more than once resolves to
/// its last descriptor, placed where that last occurrence sits in the list.
pub fn dedupe_last_wins(items: &[FormItemDescriptor]) -> IndexMap<FieldKey, FormItemDescriptor> {
    let mut indexed = IndexMap::with_capacity(items.len());
    for item in items {
        if indexed.shift_remove(&item.key).is_some() {
            tracing::warn!(key = %item.key, "duplicate descriptor key; the last one wins");
        }
        indexed.insert(item.key.clone(), item.clone());
    }
    indexed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_defaults_follow_field_kind() {
        assert_eq!(FieldType::Switch.default_value(), Value::Bool(false));
        assert_eq!(FieldType::Checkbox.default_value(), Value::Bool(false));
        assert_eq!(FieldType::Select.default_value(), Value::String(String::new()));
        assert_eq!(
            FieldType::Custom("rating".into()).default_value(),
            Value::String(String::new())
        );
    }

    #[test]
    fn duplicate_keys_keep_the_last_descriptor() {
        let items = vec![
            FormItemDescriptor::input("a").span(2),
            FormItemDescriptor::input("b"),
            FormItemDescriptor::input("a").span(3),
        ];
        let indexed = dedupe_last_wins(&items);
        let keys = indexed.keys().map(FieldKey::as_str).collect::<Vec<_>>();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(indexed.get("a").and_then(|item| item.span), Some(3));
    }

    #[test]
    fn field_key_looks_up_by_str() {
        let mut values = FieldValues::new();
        values.insert(FieldKey::from("email"), Value::from("a@b.c"));
        assert_eq!(values.get("email"), Some(&Value::from("a@b.c")));
        assert_eq!(FieldKey::from("email").to_string(), "email");
    }
}
