//! # Field Constraints
//!
//! Recovers structural validation rules (required-ness, string length bounds, allowed values)
//! from the custom options attached to fields, and evaluates them against candidate input.
//!
//! Two option schemas are understood:
//!
//! * `validate.rules` from protoc-gen-validate (`FieldOptions` extension 1071): `string.min_len`,
//!   `string.max_len`, `string.len`, `string.in`, `enum.in` and `message.required`.
//! * `google.api.field_behavior` (`FieldOptions` extension 1052): `REQUIRED`.
//!
//! See [`extract`] for how each field's options are read and [`validate`] for the checks.
//! Rules are derived data: a field without rules may still be constrained by a schema this
//! module does not understand.
pub mod extract;
pub mod validate;

pub use extract::extract_rules;
pub use validate::validate;

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// PGV `FieldOptions` extension number for `validate.rules`.
pub const VALIDATE_RULES_EXTENSION: u32 = 1071;
/// `FieldOptions` extension number for `google.api.field_behavior`.
pub const FIELD_BEHAVIOR_EXTENSION: u32 = 1052;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConstraintRules {
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

impl ConstraintRules {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Takes from `other` every rule `self` does not already carry.
    pub fn fill_missing(&mut self, other: ConstraintRules) {
        self.required |= other.required;
        self.min_length = self.min_length.or(other.min_length);
        self.max_length = self.max_length.or(other.max_length);
        if self.allowed_values.is_none() {
            self.allowed_values = other.allowed_values;
        }
    }

    /// Like [`fill_missing`](Self::fill_missing), but allowed values from `other` are appended
    /// to the ones already collected. Used for options that repeat one value at a time.
    pub fn merge(&mut self, other: ConstraintRules) {
        let allowed = other.allowed_values.clone();
        self.fill_missing(other);

        if let (Some(current), Some(extra)) = (&mut self.allowed_values, allowed) {
            for value in extra {
                if !current.contains(&value) {
                    current.push(value);
                }
            }
        }
    }
}

/// One field of a message, as seen by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldEntry {
    pub name: String,
    pub json_name: String,
    /// Fully-qualified name of the field's message type, for message fields that are not maps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    pub is_list: bool,
    /// Value names by number, for enum fields.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub enum_values: BTreeMap<i32, String>,
    pub rules: ConstraintRules,
}

/// The fields of one message, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageRules {
    pub fields: Vec<FieldEntry>,
}

/// Constraint rules of every message of a registry, keyed by fully-qualified message name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSet {
    messages: HashMap<String, MessageRules>,
}

impl RuleSet {
    pub(crate) fn insert(&mut self, message: String, rules: MessageRules) {
        self.messages.insert(message, rules);
    }

    pub fn message(&self, message: &str) -> Option<&MessageRules> {
        self.messages.get(message)
    }

    /// The rules of `field` in `message`, if the field declares any.
    pub fn rules_for(&self, message: &str, field: &str) -> Option<&ConstraintRules> {
        self.messages
            .get(message)?
            .fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| &f.rules)
            .filter(|rules| !rules.is_empty())
    }

    /// Every field with at least one rule, paired with its message name and sorted by it.
    pub fn constrained_fields(&self) -> Vec<(&str, &FieldEntry)> {
        let mut out: Vec<_> = self
            .messages
            .iter()
            .flat_map(|(message, rules)| {
                rules
                    .fields
                    .iter()
                    .filter(|f| !f.rules.is_empty())
                    .map(move |f| (message.as_str(), f))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }
}
