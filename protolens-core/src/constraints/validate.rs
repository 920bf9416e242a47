//! Rule evaluation.
//!
//! Each field contributes at most one violation: the first failing check among required,
//! minimum length, maximum length and allowed values. Fields are visited in declaration order,
//! and fields of nested messages are reported with a dotted path (`forecast.location`).
use super::{FieldEntry, RuleSet};
use crate::codec::Value;

/// Checks `candidate` against the rules of message `message`.
///
/// Returns one message per violated field; an empty list means the candidate is valid. A message
/// without known rules accepts any candidate.
pub fn validate(message: &str, rules: &RuleSet, candidate: &Value) -> Vec<String> {
    let mut violations = Vec::new();
    validate_message(message, rules, candidate, "", &mut violations);
    violations
}

fn validate_message(
    message: &str,
    rules: &RuleSet,
    candidate: &Value,
    prefix: &str,
    out: &mut Vec<String>,
) {
    let Some(message_rules) = rules.message(message) else {
        return;
    };

    for field in &message_rules.fields {
        let path = format!("{prefix}{}", field.name);
        let value = lookup(candidate, field);

        if let Some(violation) = check(field, value) {
            out.push(format!("field '{path}' {violation}"));
            continue;
        }

        let (Some(nested), Some(value)) = (&field.message_type, value) else {
            continue;
        };
        match value {
            Value::Map(_) => validate_message(nested, rules, value, &format!("{path}."), out),
            Value::List(items) if field.is_list => {
                for (i, item) in items.iter().enumerate() {
                    validate_message(nested, rules, item, &format!("{path}[{i}]."), out);
                }
            }
            _ => {}
        }
    }
}

fn lookup<'a>(candidate: &'a Value, field: &FieldEntry) -> Option<&'a Value> {
    candidate
        .get(&field.name)
        .or_else(|| candidate.get(&field.json_name))
        .filter(|v| !v.is_null())
}

/// The first rule `value` breaks, phrased to follow `field 'x' `.
fn check(field: &FieldEntry, value: Option<&Value>) -> Option<String> {
    let rules = &field.rules;
    if rules.required && is_empty(value) {
        return Some("is required".to_string());
    }

    let value = value?;
    let items: Vec<&Value> = match value {
        Value::List(items) => items.iter().collect(),
        other => vec![other],
    };

    for spellings in items.into_iter().map(|item| spellings(field, item)) {
        let Some(text) = spellings.first() else {
            continue;
        };
        let length = text.chars().count() as u64;

        if let Some(min) = rules.min_length
            && length < min
        {
            return Some(format!("must be at least {min} characters"));
        }
        if let Some(max) = rules.max_length
            && length > max
        {
            return Some(format!("must be at most {max} characters"));
        }
        if let Some(allowed) = &rules.allowed_values
            && !spellings.iter().any(|s| allowed.contains(s))
        {
            return Some(format!("must be one of: {}", allowed.join(", ")));
        }
    }

    None
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::List(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// The textual forms a rule is checked against: strings as-is, numbers as digits and, for enum
/// fields, also the name of the value they stand for.
fn spellings(field: &FieldEntry, value: &Value) -> Vec<String> {
    let number = match value {
        Value::String(s) => return vec![s.clone()],
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        _ => return Vec::new(),
    };

    let name = number
        .parse::<i32>()
        .ok()
        .and_then(|n| field.enum_values.get(&n))
        .cloned();

    std::iter::once(number).chain(name).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constraints::{ConstraintRules, MessageRules};

    fn entry(name: &str, rules: ConstraintRules) -> FieldEntry {
        FieldEntry {
            name: name.to_string(),
            json_name: name.to_string(),
            message_type: None,
            is_list: false,
            enum_values: Default::default(),
            rules,
        }
    }

    fn required() -> ConstraintRules {
        ConstraintRules {
            required: true,
            ..Default::default()
        }
    }

    fn one_of(values: &[&str]) -> ConstraintRules {
        ConstraintRules {
            allowed_values: Some(values.iter().map(|v| v.to_string()).collect()),
            ..Default::default()
        }
    }

    fn weather_rules() -> RuleSet {
        let mut set = RuleSet::default();
        set.insert(
            "examples.weather.GetWeatherRequest".to_string(),
            MessageRules {
                fields: vec![
                    entry("location", required()),
                    entry("units", one_of(&["metric", "imperial"])),
                ],
            },
        );
        set
    }

    fn check_request(candidate: Value) -> Vec<String> {
        validate("examples.weather.GetWeatherRequest", &weather_rules(), &candidate)
    }

    #[test]
    fn empty_required_field_is_reported_alone() {
        let violations = check_request(Value::map([("location", ""), ("units", "metric")]));

        assert_eq!(violations, vec!["field 'location' is required"]);
    }

    #[test]
    fn value_outside_allowed_set_lists_the_allowed_values() {
        let violations = check_request(Value::map([("location", "NYC"), ("units", "kelvin")]));

        assert_eq!(
            violations,
            vec!["field 'units' must be one of: metric, imperial"]
        );
    }

    #[test]
    fn valid_candidate_has_no_violations() {
        let violations = check_request(Value::map([("location", "NYC"), ("units", "metric")]));

        assert!(violations.is_empty());
    }

    #[test]
    fn violations_follow_declaration_order_with_one_per_field() {
        let violations = check_request(Value::map([("units", "kelvin")]));

        assert_eq!(
            violations,
            vec![
                "field 'location' is required",
                "field 'units' must be one of: metric, imperial",
            ]
        );
    }

    #[test]
    fn absent_optional_field_skips_its_checks() {
        let violations = check_request(Value::map([("location", "NYC")]));

        assert!(violations.is_empty());
    }

    #[test]
    fn required_short_circuits_length_checks() {
        let mut set = RuleSet::default();
        set.insert(
            "pkg.M".to_string(),
            MessageRules {
                fields: vec![entry(
                    "code",
                    ConstraintRules {
                        required: true,
                        min_length: Some(3),
                        max_length: Some(4),
                        allowed_values: Some(vec!["abcd".to_string()]),
                    },
                )],
            },
        );

        let cases = [
            (Value::map([("code", Value::Null)]), "field 'code' is required"),
            (Value::map([("code", "ab")]), "field 'code' must be at least 3 characters"),
            (Value::map([("code", "abcde")]), "field 'code' must be at most 4 characters"),
            (Value::map([("code", "abce")]), "field 'code' must be one of: abcd"),
        ];

        for (candidate, expected) in cases {
            assert_eq!(validate("pkg.M", &set, &candidate), vec![expected]);
        }
    }

    #[test]
    fn nested_messages_are_reported_with_a_dotted_path() {
        let mut set = weather_rules();
        set.insert(
            "pkg.Batch".to_string(),
            MessageRules {
                fields: vec![FieldEntry {
                    message_type: Some("examples.weather.GetWeatherRequest".to_string()),
                    is_list: true,
                    ..entry("requests", ConstraintRules::default())
                }],
            },
        );

        let candidate = Value::map([(
            "requests",
            Value::List(vec![
                Value::map([("location", "NYC")]),
                Value::map([("location", "")]),
            ]),
        )]);

        assert_eq!(
            validate("pkg.Batch", &set, &candidate),
            vec!["field 'requests[1].location' is required"]
        );
    }

    #[test]
    fn enum_numbers_match_the_names_they_stand_for() {
        let mut set = RuleSet::default();
        set.insert(
            "pkg.Account".to_string(),
            MessageRules {
                fields: vec![FieldEntry {
                    enum_values: [(0, "STATUS_UNSPECIFIED"), (1, "ACTIVE"), (2, "RETIRED")]
                        .into_iter()
                        .map(|(n, name)| (n, name.to_string()))
                        .collect(),
                    ..entry("status", one_of(&["ACTIVE", "7"]))
                }],
            },
        );

        let accepted = [
            Value::map([("status", Value::Int(1))]),
            Value::map([("status", Value::UInt(1))]),
            Value::map([("status", "ACTIVE")]),
            Value::map([("status", Value::Int(7))]),
        ];
        for candidate in accepted {
            assert!(validate("pkg.Account", &set, &candidate).is_empty());
        }

        assert_eq!(
            validate("pkg.Account", &set, &Value::map([("status", Value::Int(2))])),
            vec!["field 'status' must be one of: ACTIVE, 7"]
        );
    }

    #[test]
    fn validation_is_deterministic() {
        let candidate = Value::map([("units", "kelvin")]);

        assert_eq!(check_request(candidate.clone()), check_request(candidate));
    }
}
