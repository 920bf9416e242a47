//! Rule extraction.
//!
//! Every field's options are read three ways, and the results merged so that an earlier source
//! wins for each individual rule:
//!
//! 1. **Known extensions.** When the registry contains `validate/validate.proto` or
//!    `google/api/field_behavior.proto`, the options are decoded through `prost-reflect`.
//! 2. **Raw extension bytes.** Otherwise the extension payloads are still present in the
//!    original `FieldOptions` bytes, and are decoded field by field with [`crate::wire`].
//! 3. **Uninterpreted options.** Descriptors that were never fully compiled carry options as
//!    `uninterpreted_option` entries (`FieldOptions` field 999). Entries whose dotted name starts
//!    with `validate.rules` or `google.api.field_behavior` are read from their scalar value, and
//!    their aggregate text is scanned for `required: true`, `min_len: N`, `max_len: N`,
//!    `len: N` and `in: [...]`. Anything else in the aggregate text is ignored.
use super::{
    ConstraintRules, FIELD_BEHAVIOR_EXTENSION, FieldEntry, MessageRules, RuleSet,
    VALIDATE_RULES_EXTENSION,
};
use crate::registry::TypeRegistry;
use crate::wire::{self, WireError};
use once_cell::sync::Lazy;
use prost::Message;
use prost_reflect::{DynamicMessage, ExtensionDescriptor, FieldDescriptor, Kind, ReflectMessage};
use prost_types::{FieldOptions, UninterpretedOption};
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

/// `google.api.FieldBehavior.REQUIRED`.
const FIELD_BEHAVIOR_REQUIRED: i32 = 2;

// validate.FieldRules
const RULES_STRING: u32 = 14;
const RULES_ENUM: u32 = 16;
const RULES_MESSAGE: u32 = 17;
// validate.StringRules
const STRING_MIN_LEN: u32 = 2;
const STRING_MAX_LEN: u32 = 3;
const STRING_IN: u32 = 10;
const STRING_LEN: u32 = 19;
// validate.EnumRules
const ENUM_IN: u32 = 3;
// validate.MessageRules
const MESSAGE_REQUIRED: u32 = 2;

static REQUIRED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\brequired\s*:\s*true\b").unwrap());
static MIN_LEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bmin_len\s*:\s*(\d+)").unwrap());
static MAX_LEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bmax_len\s*:\s*(\d+)").unwrap());
static LEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\blen\s*:\s*(\d+)").unwrap());
static IN_LIST: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bin\s*:\s*\[([^\]]*)\]").unwrap());
static IN_SCALAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bin\s*:\s*("[^"]*"|'[^']*'|-?\d+|[A-Za-z_]\w*)"#).unwrap());
static BEHAVIOR_REQUIRED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bREQUIRED\b").unwrap());

/// Extracts the rules of every field of every message in `registry`.
pub fn extract_rules(registry: &TypeRegistry) -> RuleSet {
    let raw = raw_options(registry);
    let pool = registry.pool();
    let validate_ext = pool.get_extension_by_name("validate.rules");
    let behavior_ext = pool.get_extension_by_name("google.api.field_behavior");

    let mut set = RuleSet::default();
    for message in pool.all_messages() {
        if message.is_map_entry() {
            continue;
        }

        let fields = message
            .fields()
            .map(|field| {
                let mut rules =
                    from_extensions(&field, validate_ext.as_ref(), behavior_ext.as_ref());

                if let Some(options) = raw
                    .get(message.full_name())
                    .and_then(|fields| fields.get(field.name()))
                {
                    rules.fill_missing(from_raw_extensions(&field, options));
                    rules.fill_missing(from_uninterpreted(&field, options));
                }

                let message_type = match field.kind() {
                    Kind::Message(m) if !field.is_map() => Some(m.full_name().to_string()),
                    _ => None,
                };
                let enum_values = match field.kind() {
                    Kind::Enum(e) => e
                        .values()
                        .map(|v| (v.number(), v.name().to_string()))
                        .collect(),
                    _ => Default::default(),
                };

                FieldEntry {
                    name: field.name().to_string(),
                    json_name: field.json_name().to_string(),
                    message_type,
                    is_list: field.is_list(),
                    enum_values,
                    rules,
                }
            })
            .collect();

        set.insert(message.full_name().to_string(), MessageRules { fields });
    }

    set
}

/// Original `FieldOptions` bytes, by message name and then field name.
fn raw_options(registry: &TypeRegistry) -> HashMap<String, HashMap<String, &[u8]>> {
    let mut index: HashMap<String, HashMap<String, &[u8]>> = HashMap::new();

    for (file, bytes) in registry.files() {
        match wire::field_options_index(bytes) {
            Ok(entries) => {
                for entry in entries {
                    index
                        .entry(entry.message)
                        .or_default()
                        .insert(entry.field, entry.options);
                }
            }
            Err(error) => warn!(%file, %error, "Skipping raw field options of malformed file"),
        }
    }

    index
}

fn from_extensions(
    field: &FieldDescriptor,
    validate: Option<&ExtensionDescriptor>,
    behavior: Option<&ExtensionDescriptor>,
) -> ConstraintRules {
    let options = field.options();
    let mut rules = ConstraintRules::default();

    if let Some(ext) = behavior
        && options.has_extension(ext)
    {
        let behaviors = options.get_extension(ext);
        rules.required = behaviors.as_list().is_some_and(|items| {
            items
                .iter()
                .any(|v| v.as_enum_number() == Some(FIELD_BEHAVIOR_REQUIRED))
        });
    }

    let Some(ext) = validate else {
        return rules;
    };
    if !options.has_extension(ext) {
        return rules;
    }
    let value = options.get_extension(ext);
    let Some(field_rules) = value.as_message() else {
        return rules;
    };

    if let Some(string) = set_message(field_rules, "string") {
        let len = set_value(&string, "len").and_then(|v| v.as_u64());
        rules.min_length = set_value(&string, "min_len").and_then(|v| v.as_u64()).or(len);
        rules.max_length = set_value(&string, "max_len").and_then(|v| v.as_u64()).or(len);
        rules.allowed_values = set_value(&string, "in").and_then(|v| {
            v.as_list().map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect()
            })
        });
    }

    if let Some(enumeration) = set_message(field_rules, "enum")
        && let Some(prost_reflect::Value::List(items)) = set_value(&enumeration, "in")
    {
        let numbers = items.iter().filter_map(|v| v.as_i32());
        rules.allowed_values = Some(enum_names(field, numbers));
    }

    if let Some(message) = set_message(field_rules, "message") {
        rules.required |= set_value(&message, "required")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
    }

    rules
}

fn set_value(message: &DynamicMessage, name: &str) -> Option<prost_reflect::Value> {
    let field = message.descriptor().get_field_by_name(name)?;
    message
        .has_field(&field)
        .then(|| message.get_field(&field).into_owned())
}

fn set_message(message: &DynamicMessage, name: &str) -> Option<DynamicMessage> {
    match set_value(message, name)? {
        prost_reflect::Value::Message(m) => Some(m),
        _ => None,
    }
}

fn from_raw_extensions(field: &FieldDescriptor, options: &[u8]) -> ConstraintRules {
    match read_raw_extensions(field, options) {
        Ok(rules) => rules,
        Err(error) => {
            warn!(field = field.full_name(), %error, "Ignoring malformed validation extension");
            ConstraintRules::default()
        }
    }
}

fn read_raw_extensions(
    field: &FieldDescriptor,
    options: &[u8],
) -> Result<ConstraintRules, WireError> {
    let mut rules = ConstraintRules::default();

    rules.required = wire::varints(options, FIELD_BEHAVIOR_EXTENSION)?
        .contains(&(FIELD_BEHAVIOR_REQUIRED as u64));

    for field_rules in wire::length_delimited(options, VALIDATE_RULES_EXTENSION)? {
        for string in wire::length_delimited(field_rules, RULES_STRING)? {
            let len = wire::varints(string, STRING_LEN)?.last().copied();
            rules.min_length = wire::varints(string, STRING_MIN_LEN)?.last().copied().or(len);
            rules.max_length = wire::varints(string, STRING_MAX_LEN)?.last().copied().or(len);

            let allowed = wire::repeated_strings(string, STRING_IN)?;
            if !allowed.is_empty() {
                rules.allowed_values = Some(allowed);
            }
        }

        for enumeration in wire::length_delimited(field_rules, RULES_ENUM)? {
            let numbers = wire::varints(enumeration, ENUM_IN)?;
            if !numbers.is_empty() {
                // int32 values are sign-extended to 64 bits on the wire
                let numbers = numbers
                    .into_iter()
                    .filter_map(|n| i32::try_from(n as i64).ok());
                rules.allowed_values = Some(enum_names(field, numbers));
            }
        }

        for message in wire::length_delimited(field_rules, RULES_MESSAGE)? {
            if wire::varints(message, MESSAGE_REQUIRED)?.last() == Some(&1) {
                rules.required = true;
            }
        }
    }

    Ok(rules)
}

fn from_uninterpreted(field: &FieldDescriptor, options: &[u8]) -> ConstraintRules {
    let decoded = match FieldOptions::decode(options) {
        Ok(decoded) => decoded,
        Err(error) => {
            warn!(field = field.full_name(), %error, "Ignoring malformed field options");
            return ConstraintRules::default();
        }
    };

    let mut rules = ConstraintRules::default();
    for option in &decoded.uninterpreted_option {
        let name = dotted_name(option);

        if name.starts_with("google.api.field_behavior") {
            let required = option.identifier_value() == "REQUIRED"
                || BEHAVIOR_REQUIRED.is_match(option.aggregate_value());
            rules.required |= required;
        } else if let Some(path) = name.strip_prefix("validate.rules") {
            rules.merge(uninterpreted_scalar(field, path, option));
            rules.merge(scan_aggregate(field, option.aggregate_value()));
        }
    }

    rules
}

fn dotted_name(option: &UninterpretedOption) -> String {
    option
        .name
        .iter()
        .map(|part| part.name_part.trim_matches(|c| c == '(' || c == ')'))
        .collect::<Vec<_>>()
        .join(".")
}

/// Reads options set one leaf at a time, e.g. `(validate.rules).string.min_len = 3`.
fn uninterpreted_scalar(
    field: &FieldDescriptor,
    path: &str,
    option: &UninterpretedOption,
) -> ConstraintRules {
    let mut rules = ConstraintRules::default();

    match path.rsplit('.').next().unwrap_or_default() {
        "min_len" => rules.min_length = option.positive_int_value,
        "max_len" => rules.max_length = option.positive_int_value,
        "len" => {
            rules.min_length = option.positive_int_value;
            rules.max_length = option.positive_int_value;
        }
        "required" => rules.required = option.identifier_value() == "true",
        "in" => {
            if let Some(value) = &option.string_value {
                rules.allowed_values = Some(vec![String::from_utf8_lossy(value).into_owned()]);
            } else if let Some(number) = option.positive_int_value {
                match i32::try_from(number) {
                    Ok(number) => rules.allowed_values = Some(enum_names(field, [number])),
                    Err(_) => warn!(
                        field = field.full_name(),
                        number, "Ignoring out of range enum value in validation option"
                    ),
                }
            } else if let Some(identifier) = &option.identifier_value {
                rules.allowed_values = Some(vec![identifier.clone()]);
            }
        }
        _ => {}
    }

    rules
}

/// Scans the text form of an aggregate option value.
fn scan_aggregate(field: &FieldDescriptor, text: &str) -> ConstraintRules {
    let number = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
    };

    let len = number(&LEN);
    let mut rules = ConstraintRules {
        required: REQUIRED.is_match(text),
        min_length: number(&MIN_LEN).or(len),
        max_length: number(&MAX_LEN).or(len),
        allowed_values: None,
    };

    let mut allowed = Vec::new();
    for list in IN_LIST.captures_iter(text).filter_map(|c| c.get(1)) {
        allowed.extend(
            list.as_str()
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| literal(field, item)),
        );
    }
    for item in IN_SCALAR.captures_iter(text).filter_map(|c| c.get(1)) {
        allowed.push(literal(field, item.as_str()));
    }
    if !allowed.is_empty() {
        rules.allowed_values = Some(allowed);
    }

    rules
}

/// A text-format literal as an allowed value: quotes are stripped and enum numbers are named.
fn literal(field: &FieldDescriptor, item: &str) -> String {
    let unquoted = item.trim_matches(|c| c == '"' || c == '\'');
    if unquoted.len() != item.len() {
        return unquoted.to_string();
    }

    match item.parse::<i32>() {
        Ok(number) if matches!(field.kind(), Kind::Enum(_)) => {
            enum_names(field, [number]).remove(0)
        }
        _ => item.to_string(),
    }
}

/// Names `numbers` after the values of the field's enum, falling back to the number itself.
fn enum_names(field: &FieldDescriptor, numbers: impl IntoIterator<Item = i32>) -> Vec<String> {
    let enumeration = match field.kind() {
        Kind::Enum(e) => Some(e),
        _ => None,
    };

    numbers
        .into_iter()
        .map(|n| {
            enumeration
                .as_ref()
                .and_then(|e| e.get_value(n))
                .map(|v| v.name().to_string())
                .unwrap_or_else(|| n.to_string())
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use prost::encoding::{WireType, encode_key, encode_varint};
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::uninterpreted_option::NamePart;
    use prost_types::{
        DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
        FileDescriptorProto,
    };

    fn append_bytes(buf: &mut Vec<u8>, number: u32, payload: &[u8]) {
        encode_key(number, WireType::LengthDelimited, buf);
        encode_varint(payload.len() as u64, buf);
        buf.extend_from_slice(payload);
    }

    fn append_varint(buf: &mut Vec<u8>, number: u32, value: u64) {
        encode_key(number, WireType::Varint, buf);
        encode_varint(value, buf);
    }

    fn field(name: &str, number: i32, kind: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(Label::Optional as i32),
            r#type: Some(kind as i32),
            ..Default::default()
        }
    }

    /// Encodes a file whose fields carry the given raw `FieldOptions` bytes.
    fn encoded_file(fields: Vec<(FieldDescriptorProto, Vec<u8>)>) -> Vec<u8> {
        let mut message = DescriptorProto {
            name: Some("Request".to_string()),
            ..Default::default()
        }
        .encode_to_vec();

        for (field, options) in fields {
            let mut encoded = field.encode_to_vec();
            if !options.is_empty() {
                append_bytes(&mut encoded, 8, &options);
            }
            append_bytes(&mut message, 2, &encoded);
        }

        let status = EnumDescriptorProto {
            name: Some("Status".to_string()),
            value: ["STATUS_UNSPECIFIED", "ACTIVE", "RETIRED"]
                .iter()
                .enumerate()
                .map(|(i, name)| EnumValueDescriptorProto {
                    name: Some(name.to_string()),
                    number: Some(i as i32),
                    options: None,
                })
                .collect(),
            ..Default::default()
        };

        let mut file = FileDescriptorProto {
            name: Some("request.proto".to_string()),
            package: Some("pkg".to_string()),
            enum_type: vec![status],
            syntax: Some("proto3".to_string()),
            ..Default::default()
        }
        .encode_to_vec();
        append_bytes(&mut file, 4, &message);
        file
    }

    fn rules_of(file: Vec<u8>) -> RuleSet {
        let registry = TypeRegistry::from_encoded([bytes::Bytes::from(file)]).unwrap();
        extract_rules(&registry)
    }

    fn option(parts: &[&str], configure: impl FnOnce(&mut UninterpretedOption)) -> UninterpretedOption {
        let mut option = UninterpretedOption {
            name: parts
                .iter()
                .enumerate()
                .map(|(i, part)| NamePart {
                    name_part: part.to_string(),
                    is_extension: i == 0,
                })
                .collect(),
            ..Default::default()
        };
        configure(&mut option);
        option
    }

    fn options(uninterpreted_option: Vec<UninterpretedOption>) -> Vec<u8> {
        FieldOptions {
            uninterpreted_option,
            ..Default::default()
        }
        .encode_to_vec()
    }

    fn uninterpreted(parts: &[&str], configure: impl FnOnce(&mut UninterpretedOption)) -> Vec<u8> {
        options(vec![option(parts, configure)])
    }

    #[test]
    fn raw_extension_bytes_are_decoded_without_their_schema() {
        let mut string_rules = Vec::new();
        append_varint(&mut string_rules, STRING_MIN_LEN, 2);
        append_varint(&mut string_rules, STRING_MAX_LEN, 8);
        append_bytes(&mut string_rules, STRING_IN, b"metric");
        append_bytes(&mut string_rules, STRING_IN, b"imperial");
        let mut field_rules = Vec::new();
        append_bytes(&mut field_rules, RULES_STRING, &string_rules);
        let mut units = Vec::new();
        append_bytes(&mut units, VALIDATE_RULES_EXTENSION, &field_rules);

        let mut location = Vec::new();
        append_varint(&mut location, FIELD_BEHAVIOR_EXTENSION, FIELD_BEHAVIOR_REQUIRED as u64);

        let mut enum_rules = Vec::new();
        append_varint(&mut enum_rules, ENUM_IN, 1);
        append_varint(&mut enum_rules, ENUM_IN, 7);
        let mut field_rules = Vec::new();
        append_bytes(&mut field_rules, RULES_ENUM, &enum_rules);
        let mut status = Vec::new();
        append_bytes(&mut status, VALIDATE_RULES_EXTENSION, &field_rules);

        let mut status_field = field("status", 3, Type::Enum);
        status_field.type_name = Some(".pkg.Status".to_string());

        let rules = rules_of(encoded_file(vec![
            (field("location", 1, Type::String), location),
            (field("units", 2, Type::String), units),
            (status_field, status),
        ]));

        assert_eq!(
            rules.rules_for("pkg.Request", "location"),
            Some(&ConstraintRules {
                required: true,
                ..Default::default()
            })
        );
        assert_eq!(
            rules.rules_for("pkg.Request", "units"),
            Some(&ConstraintRules {
                required: false,
                min_length: Some(2),
                max_length: Some(8),
                allowed_values: Some(vec!["metric".to_string(), "imperial".to_string()]),
            })
        );
        assert_eq!(
            rules
                .rules_for("pkg.Request", "status")
                .and_then(|r| r.allowed_values.clone()),
            Some(vec!["ACTIVE".to_string(), "7".to_string()])
        );
    }

    #[test]
    fn leaf_uninterpreted_options_are_read_from_their_scalar() {
        let min_len = uninterpreted(&["validate.rules", "string", "min_len"], |o| {
            o.positive_int_value = Some(3)
        });
        let required = uninterpreted(&["google.api.field_behavior"], |o| {
            o.identifier_value = Some("REQUIRED".to_string())
        });

        let rules = rules_of(encoded_file(vec![
            (field("name", 1, Type::String), min_len),
            (field("id", 2, Type::String), required),
        ]));

        assert_eq!(
            rules.rules_for("pkg.Request", "name").and_then(|r| r.min_length),
            Some(3)
        );
        assert!(rules.rules_for("pkg.Request", "id").is_some_and(|r| r.required));
    }

    #[test]
    fn aggregate_uninterpreted_options_are_scanned() {
        let aggregate = uninterpreted(&["validate.rules", "string"], |o| {
            o.aggregate_value = Some(r#"min_len: 1 max_len: 16 in: ["a", 'b'] in: "c""#.to_string())
        });
        let message = uninterpreted(&["validate.rules"], |o| {
            o.aggregate_value = Some("message { required: true }".to_string())
        });

        let rules = rules_of(encoded_file(vec![
            (field("code", 1, Type::String), aggregate),
            (field("parent", 2, Type::String), message),
        ]));

        assert_eq!(
            rules.rules_for("pkg.Request", "code"),
            Some(&ConstraintRules {
                required: false,
                min_length: Some(1),
                max_length: Some(16),
                allowed_values: Some(vec!["a".into(), "b".into(), "c".into()]),
            })
        );
        assert!(rules.rules_for("pkg.Request", "parent").is_some_and(|r| r.required));
    }

    #[test]
    fn fields_without_options_are_listed_unconstrained() {
        let rules = rules_of(encoded_file(vec![(field("free", 1, Type::String), vec![])]));

        let message = rules.message("pkg.Request").unwrap();
        assert_eq!(message.fields.len(), 1);
        assert!(message.fields[0].rules.is_empty());
        assert_eq!(rules.rules_for("pkg.Request", "free"), None);
    }

    #[test]
    fn not_in_and_prefixed_lengths_are_not_mistaken_for_rules() {
        let aggregate = uninterpreted(&["validate.rules", "string"], |o| {
            o.aggregate_value = Some(r#"not_in: ["x"] min_bytes: 4"#.to_string())
        });

        let rules = rules_of(encoded_file(vec![(field("code", 1, Type::String), aggregate)]));

        assert_eq!(rules.rules_for("pkg.Request", "code"), None);
    }

    #[test]
    fn repeated_leaf_in_options_accumulate() {
        let allowed = options(
            ["metric", "imperial", "metric"]
                .into_iter()
                .map(|unit| {
                    option(&["validate.rules", "string", "in"], |o| {
                        o.string_value = Some(unit.as_bytes().to_vec())
                    })
                })
                .collect(),
        );

        let rules = rules_of(encoded_file(vec![(field("units", 1, Type::String), allowed)]));

        assert_eq!(
            rules
                .rules_for("pkg.Request", "units")
                .and_then(|r| r.allowed_values.clone()),
            Some(vec!["metric".to_string(), "imperial".to_string()])
        );
    }

    #[test]
    fn out_of_range_enum_numbers_are_ignored() {
        let mut status_field = field("status", 1, Type::Enum);
        status_field.type_name = Some(".pkg.Status".to_string());
        let allowed = options(vec![
            option(&["validate.rules", "enum", "in"], |o| {
                o.positive_int_value = Some(u64::from(u32::MAX) + 1)
            }),
            option(&["validate.rules", "enum", "in"], |o| {
                o.positive_int_value = Some(1)
            }),
        ]);

        let rules = rules_of(encoded_file(vec![(status_field, allowed)]));

        assert_eq!(
            rules
                .rules_for("pkg.Request", "status")
                .and_then(|r| r.allowed_values.clone()),
            Some(vec!["ACTIVE".to_string()])
        );
    }

    #[test]
    fn enum_fields_carry_their_value_names() {
        let mut status_field = field("status", 1, Type::Enum);
        status_field.type_name = Some(".pkg.Status".to_string());

        let rules = rules_of(encoded_file(vec![(status_field, vec![])]));
        let entry = &rules.message("pkg.Request").unwrap().fields[0];

        assert_eq!(entry.enum_values.get(&1).map(String::as_str), Some("ACTIVE"));
        assert_eq!(entry.enum_values.len(), 3);
    }
}
