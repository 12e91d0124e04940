use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::coerce::{to_display_string, to_number, utf16_len};
use crate::descriptor::FieldValues;
use crate::event::panic_message;

const CHECK_FAILED_MESSAGE: &str = "Validation failed";
const RULE_ERROR_MESSAGE: &str = "Validation error";

/// Failure raised by a rule while it was running, as opposed to a rule that
/// ran and rejected the value.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RuleError {
    message: Option<String>,
}

impl RuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    /// An error that carries no message of its own.
    pub fn unspecified() -> Self {
        Self { message: None }
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub(crate) fn into_message(self) -> String {
        self.message
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| RULE_ERROR_MESSAGE.to_string())
    }

    fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        match panic_message(payload) {
            Some(message) => Self::new(message),
            None => Self::unspecified(),
        }
    }
}

impl Display for RuleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message.as_deref().unwrap_or(RULE_ERROR_MESSAGE))
    }
}

impl std::error::Error for RuleError {}

/// Returns `Some(message)` to reject the value.
pub type PredicateFn = Arc<
    dyn Fn(Value, FieldValues) -> BoxFuture<'static, Result<Option<String>, RuleError>>
        + Send
        + Sync,
>;

/// Returns `false` to reject the value.
pub type CheckFn =
    Arc<dyn Fn(Value, FieldValues) -> BoxFuture<'static, Result<bool, RuleError>> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "validator", rename_all = "camelCase")]
pub enum BuiltinRule {
    Email,
    Url,
    Phone,
    Number,
    Integer,
    Min { min: f64 },
    Max { max: f64 },
    #[serde(rename_all = "camelCase")]
    MinLength { min_length: usize },
    #[serde(rename_all = "camelCase")]
    MaxLength { max_length: usize },
    Pattern { pattern: String },
}

impl BuiltinRule {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinRule::Email => "email",
            BuiltinRule::Url => "url",
            BuiltinRule::Phone => "phone",
            BuiltinRule::Number => "number",
            BuiltinRule::Integer => "integer",
            BuiltinRule::Min { .. } => "min",
            BuiltinRule::Max { .. } => "max",
            BuiltinRule::MinLength { .. } => "minLength",
            BuiltinRule::MaxLength { .. } => "maxLength",
            BuiltinRule::Pattern { .. } => "pattern",
        }
    }

    /// `Ok(true)` when `value` passes. A malformed `Pattern` source is an
    /// error rather than a pass.
    pub fn check(&self, value: &Value) -> Result<bool, RuleError> {
        let passed = match self {
            BuiltinRule::Email => matches(&EMAIL, &to_display_string(value)),
            BuiltinRule::Url => is_valid_url(&to_display_string(value)),
            BuiltinRule::Phone => matches(&PHONE, &to_display_string(value)),
            BuiltinRule::Number => !to_number(value).is_nan(),
            BuiltinRule::Integer => {
                let number = to_number(value);
                number.is_finite() && number.fract() == 0.0
            }
            BuiltinRule::Min { min } => to_number(value) >= *min,
            BuiltinRule::Max { max } => to_number(value) <= *max,
            BuiltinRule::MinLength { min_length } => {
                utf16_len(&to_display_string(value)) >= *min_length
            }
            BuiltinRule::MaxLength { max_length } => {
                utf16_len(&to_display_string(value)) <= *max_length
            }
            BuiltinRule::Pattern { pattern } => Regex::new(pattern)
                .map_err(|error| RuleError::new(error.to_string()))?
                .is_match(&to_display_string(value)),
        };
        Ok(passed)
    }
}

/// One validation rule attached to a field, either on its descriptor or
/// registered globally on the state manager.
#[derive(Clone)]
pub enum ValidationRule {
    Predicate(PredicateFn),
    Builtin {
        rule: BuiltinRule,
        message: Option<String>,
    },
    Check {
        validator: CheckFn,
        message: Option<String>,
    },
}

impl ValidationRule {
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&Value, &FieldValues) -> Option<String> + Send + Sync + 'static,
    {
        Self::try_predicate(move |value, values| Ok(predicate(value, values)))
    }

    pub fn try_predicate<F>(predicate: F) -> Self
    where
        F: Fn(&Value, &FieldValues) -> Result<Option<String>, RuleError> + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(move |value: Value, values: FieldValues| {
            let outcome = predicate(&value, &values);
            async move { outcome }.boxed()
        }))
    }

    pub fn predicate_async<F, Fut>(predicate: F) -> Self
    where
        F: Fn(Value, FieldValues) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<String>, RuleError>> + Send + 'static,
    {
        Self::Predicate(Arc::new(move |value: Value, values: FieldValues| {
            predicate(value, values).boxed()
        }))
    }

    pub fn builtin(rule: BuiltinRule) -> Self {
        Self::Builtin {
            rule,
            message: None,
        }
    }

    pub fn check<F>(validator: F) -> Self
    where
        F: Fn(&Value, &FieldValues) -> bool + Send + Sync + 'static,
    {
        Self::Check {
            validator: Arc::new(move |value: Value, values: FieldValues| {
                let passed = validator(&value, &values);
                async move { Ok(passed) }.boxed()
            }),
            message: None,
        }
    }

    pub fn check_async<F, Fut>(validator: F) -> Self
    where
        F: Fn(Value, FieldValues) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, RuleError>> + Send + 'static,
    {
        Self::Check {
            validator: Arc::new(move |value: Value, values: FieldValues| {
                validator(value, values).boxed()
            }),
            message: None,
        }
    }

    /// Overrides the failure message of a builtin or check rule. Predicates
    /// supply their own message and ignore this.
    pub fn with_message(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            ValidationRule::Builtin { message, .. } | ValidationRule::Check { message, .. } => {
                *message = Some(text.into());
            }
            ValidationRule::Predicate(_) => {
                tracing::debug!("message override ignored for predicate rule");
            }
        }
        self
    }

    pub fn email() -> Self {
        Self::builtin(BuiltinRule::Email)
    }

    pub fn url() -> Self {
        Self::builtin(BuiltinRule::Url)
    }

    pub fn phone() -> Self {
        Self::builtin(BuiltinRule::Phone)
    }

    pub fn number() -> Self {
        Self::builtin(BuiltinRule::Number)
    }

    pub fn integer() -> Self {
        Self::builtin(BuiltinRule::Integer)
    }

    pub fn min(min: f64) -> Self {
        Self::builtin(BuiltinRule::Min { min })
    }

    pub fn max(max: f64) -> Self {
        Self::builtin(BuiltinRule::Max { max })
    }

    pub fn min_length(min_length: usize) -> Self {
        Self::builtin(BuiltinRule::MinLength { min_length })
    }

    pub fn max_length(max_length: usize) -> Self {
        Self::builtin(BuiltinRule::MaxLength { max_length })
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::builtin(BuiltinRule::Pattern {
            pattern: pattern.into(),
        })
    }

    /// Runs the rule and returns its failure message, if any. Errors and
    /// panics inside the rule become messages; they never escape.
    pub(crate) async fn evaluate(&self, value: &Value, values: &FieldValues) -> Option<String> {
        match self {
            ValidationRule::Predicate(predicate) => {
                let (value, values) = (value.clone(), values.clone());
                match guarded(|| predicate(value, values)).await {
                    Ok(message) => message,
                    Err(error) => Some(error.into_message()),
                }
            }
            ValidationRule::Check { validator, message } => {
                let (value, values) = (value.clone(), values.clone());
                match guarded(|| validator(value, values)).await {
                    Ok(true) => None,
                    Ok(false) => Some(
                        message
                            .clone()
                            .unwrap_or_else(|| CHECK_FAILED_MESSAGE.to_string()),
                    ),
                    Err(error) => Some(error.into_message()),
                }
            }
            ValidationRule::Builtin { rule, message } => match rule.check(value) {
                Ok(true) => None,
                Ok(false) => Some(
                    message
                        .clone()
                        .unwrap_or_else(|| format!("Invalid {}", rule.name())),
                ),
                Err(error) => {
                    tracing::debug!(rule = rule.name(), %error, "builtin rule could not run");
                    Some(error.into_message())
                }
            },
        }
    }
}

impl Debug for ValidationRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationRule::Predicate(_) => f.write_str("Predicate(..)"),
            ValidationRule::Builtin { rule, message } => f
                .debug_struct("Builtin")
                .field("rule", rule)
                .field("message", message)
                .finish(),
            ValidationRule::Check { message, .. } => f
                .debug_struct("Check")
                .field("message", message)
                .finish_non_exhaustive(),
        }
    }
}

async fn guarded<T>(
    call: impl FnOnce() -> BoxFuture<'static, Result<T, RuleError>>,
) -> Result<T, RuleError> {
    let future = match catch_unwind(AssertUnwindSafe(call)) {
        Ok(future) => future,
        Err(payload) => return Err(RuleError::from_panic(payload.as_ref())),
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(RuleError::from_panic(payload.as_ref())),
    }
}

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());
static PHONE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[0-9\s\-+()]+$").ok());
fn matches(pattern: &LazyLock<Option<Regex>>, text: &str) -> bool {
    pattern.as_ref().is_some_and(|regex| regex.is_match(text))
}

/// Absolute URL as accepted by the WHATWG URL parser.
fn is_valid_url(input: &str) -> bool {
    Url::parse(input).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;

    fn run(rule: &ValidationRule, value: Value) -> Option<String> {
        block_on(rule.evaluate(&value, &FieldValues::new()))
    }

    #[test]
    fn builtin_defaults_name_the_rule() {
        assert_eq!(run(&ValidationRule::email(), json!("nope")), Some("Invalid email".into()));
        assert_eq!(run(&ValidationRule::email(), json!("a@b.co")), None);
        assert_eq!(
            run(&ValidationRule::min_length(3), json!("ab")),
            Some("Invalid minLength".into())
        );
        assert_eq!(
            run(&ValidationRule::max(10.0).with_message("Too big"), json!(11)),
            Some("Too big".into())
        );
    }

    #[test]
    fn numeric_builtins_coerce_strings() {
        assert_eq!(run(&ValidationRule::number(), json!("12.5")), None);
        assert!(run(&ValidationRule::number(), json!("twelve")).is_some());
        assert_eq!(run(&ValidationRule::integer(), json!("4")), None);
        assert!(run(&ValidationRule::integer(), json!(4.5)).is_some());
        assert_eq!(run(&ValidationRule::min(18.0), json!("18")), None);
        assert!(run(&ValidationRule::min(18.0), json!("abc")).is_some());
    }

    #[test]
    fn phone_and_pattern() {
        assert_eq!(run(&ValidationRule::phone(), json!("+1 (555) 010-9999")), None);
        assert!(run(&ValidationRule::phone(), json!("555-CALL")).is_some());
        assert_eq!(run(&ValidationRule::pattern("^[a-z]+$"), json!("abc")), None);
        assert!(run(&ValidationRule::pattern("^[a-z]+$"), json!("ABC")).is_some());
        // Malformed source rejects instead of passing silently.
        assert!(run(&ValidationRule::pattern("(unclosed"), json!("x")).is_some());
    }

    #[test]
    fn url_follows_whatwg_parsing() {
        assert!(is_valid_url("https://example.com/path?q=1"));
        assert!(is_valid_url("http://localhost:8080"));
        assert!(is_valid_url("http://[::1]:3000/"));
        assert!(is_valid_url("mailto:someone@example.com"));
        assert!(!is_valid_url("example.com"));
        assert!(!is_valid_url("http://"));
        assert!(!is_valid_url("http://exa mple.com"));
        assert!(!is_valid_url("http://host:99999"));
        assert!(!is_valid_url("1http://host"));
        assert!(!is_valid_url("http://1.2.3.256/"));
        assert!(!is_valid_url("http://[zz]/"));
        assert!(!is_valid_url("http://0x100000000/"));
        assert!(is_valid_url("http://exa\tmple.com/"));
    }

    #[test]
    fn length_rules_count_utf16_units() {
        assert!(run(&ValidationRule::max_length(1), json!("😀")).is_some());
        assert_eq!(run(&ValidationRule::max_length(2), json!("😀")), None);
    }

    #[test]
    fn predicate_and_check_messages() {
        let predicate = ValidationRule::predicate(|value, _| {
            (value == &json!("bad")).then(|| "No bad values".to_string())
        });
        assert_eq!(run(&predicate, json!("bad")), Some("No bad values".into()));
        assert_eq!(run(&predicate, json!("good")), None);

        let check = ValidationRule::check(|value, _| value.as_bool() == Some(true));
        assert_eq!(run(&check, json!(false)), Some("Validation failed".into()));
        let check = check.with_message("Must accept");
        assert_eq!(run(&check, json!(false)), Some("Must accept".into()));
    }

    #[test]
    fn failing_rules_become_messages() {
        let errors = ValidationRule::try_predicate(|_, _| Err(RuleError::new("service down")));
        assert_eq!(run(&errors, json!("x")), Some("service down".into()));

        let unspecified = ValidationRule::try_predicate(|_, _| Err(RuleError::unspecified()));
        assert_eq!(run(&unspecified, json!("x")), Some("Validation error".into()));

        let panics = ValidationRule::predicate(|_, _| panic!("boom"));
        assert_eq!(run(&panics, json!("x")), Some("boom".into()));

        let async_panics = ValidationRule::check_async(|_, _| async move {
            let fail = true;
            if fail {
                panic!("async boom");
            }
            Ok(true)
        });
        assert_eq!(run(&async_panics, json!("x")), Some("async boom".into()));
    }

    #[test]
    fn builtin_rules_deserialize_from_config() {
        let rule: BuiltinRule =
            serde_json::from_str(r#"{"validator":"minLength","minLength":3}"#).expect("parse");
        assert_eq!(rule, BuiltinRule::MinLength { min_length: 3 });
        let rule: BuiltinRule =
            serde_json::from_str(r#"{"validator":"pattern","pattern":"^\\d+$"}"#).expect("parse");
        assert_eq!(rule.name(), "pattern");
    }
}
