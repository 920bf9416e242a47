//! `Value` to `DynamicMessage` coercion, driven by field descriptors.
use super::{CodecError, Value};
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MapKey, MessageDescriptor};
use std::collections::HashMap;

pub(super) fn message(
    descriptor: MessageDescriptor,
    value: &Value,
    path: &str,
) -> Result<DynamicMessage, CodecError> {
    let mut message = DynamicMessage::new(descriptor.clone());

    let entries = match value {
        Value::Null => return Ok(message),
        Value::Map(entries) => entries,
        other => {
            return Err(mismatch(
                root_or(path, descriptor.full_name()),
                format!("expected a map for message '{}', got {}", descriptor.full_name(), other.type_name()),
            ));
        }
    };

    for (key, value) in entries {
        let field_path = join(path, key);
        let field = descriptor
            .get_field_by_name(key)
            .or_else(|| descriptor.get_field_by_json_name(key))
            .ok_or_else(|| {
                mismatch(
                    field_path.clone(),
                    format!("no such field in '{}'", descriptor.full_name()),
                )
            })?;

        if value.is_null() {
            continue;
        }

        if let Some(oneof) = field.containing_oneof()
            && !oneof.is_synthetic()
            && let Some(other) = oneof
                .fields()
                .find(|f| f.number() != field.number() && message.has_field(f))
        {
            return Err(mismatch(
                field_path,
                format!(
                    "oneof '{}' already has '{}' set",
                    oneof.name(),
                    other.name()
                ),
            ));
        }

        let coerced = field_value(&field, value, &field_path)?;
        message
            .try_set_field(&field, coerced)
            .map_err(|e| mismatch(field_path, e.to_string()))?;
    }

    Ok(message)
}

fn field_value(
    field: &FieldDescriptor,
    value: &Value,
    path: &str,
) -> Result<prost_reflect::Value, CodecError> {
    if field.is_map() {
        let Kind::Message(entry) = field.kind() else {
            return Err(mismatch(path, "map field without an entry type"));
        };
        let Value::Map(entries) = value else {
            return Err(mismatch(path, format!("expected a map, got {}", value.type_name())));
        };

        let key_kind = entry.map_entry_key_field().kind();
        let value_kind = entry.map_entry_value_field().kind();

        let mut map = HashMap::with_capacity(entries.len());
        for (key, value) in entries {
            let entry_path = format!("{path}[{key}]");
            let key = map_key(&key_kind, key, &entry_path)?;
            map.insert(key, single(&value_kind, value, &entry_path)?);
        }
        return Ok(prost_reflect::Value::Map(map));
    }

    if field.is_list() {
        let Value::List(items) = value else {
            return Err(mismatch(path, format!("expected a list, got {}", value.type_name())));
        };

        let kind = field.kind();
        let items = items
            .iter()
            .enumerate()
            .map(|(i, item)| single(&kind, item, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(prost_reflect::Value::List(items));
    }

    single(&field.kind(), value, path)
}

fn single(kind: &Kind, value: &Value, path: &str) -> Result<prost_reflect::Value, CodecError> {
    use prost_reflect::Value as V;

    let coerced = match kind {
        Kind::Double => V::F64(float(value, path)?),
        Kind::Float => V::F32(float32(value, path)?),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => V::I32(integer(value, path)?),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => V::I64(integer(value, path)?),
        Kind::Uint32 | Kind::Fixed32 => V::U32(integer(value, path)?),
        Kind::Uint64 | Kind::Fixed64 => V::U64(integer(value, path)?),
        Kind::Bool => match value {
            Value::Bool(b) => V::Bool(*b),
            Value::String(s) if s == "true" => V::Bool(true),
            Value::String(s) if s == "false" => V::Bool(false),
            other => return Err(expected("bool", other, path)),
        },
        Kind::String => match value {
            Value::String(s) => V::String(s.clone()),
            other => return Err(expected("string", other, path)),
        },
        Kind::Bytes => V::Bytes(bytes(value, path)?.into()),
        Kind::Enum(descriptor) => {
            let found = match value {
                Value::String(name) => descriptor.get_value_by_name(name),
                Value::Int(_) | Value::UInt(_) | Value::Float(_) => {
                    descriptor.get_value(integer(value, path)?)
                }
                other => return Err(expected("enum name or number", other, path)),
            };
            let found = found.ok_or_else(|| {
                mismatch(
                    path,
                    format!("not a value of enum '{}'", descriptor.full_name()),
                )
            })?;
            V::EnumNumber(found.number())
        }
        Kind::Message(descriptor) => V::Message(message(descriptor.clone(), value, path)?),
    };

    Ok(coerced)
}

fn integer<T: TryFrom<i128>>(value: &Value, path: &str) -> Result<T, CodecError> {
    let wide: i128 = match value {
        Value::Int(i) => (*i).into(),
        Value::UInt(u) => (*u).into(),
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => *f as i128,
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| mismatch(path, format!("'{s}' is not an integer")))?,
        other => return Err(expected("integer", other, path)),
    };

    T::try_from(wide).map_err(|_| mismatch(path, format!("{wide} is out of range")))
}

fn float(value: &Value, path: &str) -> Result<f64, CodecError> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        Value::UInt(u) => Ok(*u as f64),
        Value::String(s) => match s.trim() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            number => number
                .parse()
                .map_err(|_| mismatch(path, format!("'{s}' is not a number"))),
        },
        other => Err(expected("number", other, path)),
    }
}

/// Non-finite inputs stay non-finite; finite ones must fit an `f32`.
fn float32(value: &Value, path: &str) -> Result<f32, CodecError> {
    let wide = float(value, path)?;
    let narrow = wide as f32;
    if wide.is_finite() && !narrow.is_finite() {
        return Err(mismatch(path, format!("{wide} is out of range for float")));
    }
    Ok(narrow)
}

fn bytes(value: &Value, path: &str) -> Result<Vec<u8>, CodecError> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        Value::String(s) => Ok(s.clone().into_bytes()),
        Value::List(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| integer::<u8>(item, &format!("{path}[{i}]")))
            .collect(),
        other => Err(expected("bytes", other, path)),
    }
}

fn map_key(kind: &Kind, key: &str, path: &str) -> Result<MapKey, CodecError> {
    let as_value = Value::String(key.to_string());

    let key = match kind {
        Kind::String => MapKey::String(key.to_string()),
        Kind::Bool => match key {
            "true" => MapKey::Bool(true),
            "false" => MapKey::Bool(false),
            _ => return Err(mismatch(path, format!("'{key}' is not a bool key"))),
        },
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => MapKey::I32(integer(&as_value, path)?),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => MapKey::I64(integer(&as_value, path)?),
        Kind::Uint32 | Kind::Fixed32 => MapKey::U32(integer(&as_value, path)?),
        Kind::Uint64 | Kind::Fixed64 => MapKey::U64(integer(&as_value, path)?),
        _ => return Err(mismatch(path, "unsupported map key type")),
    };

    Ok(key)
}

fn expected(what: &str, got: &Value, path: &str) -> CodecError {
    mismatch(path, format!("expected {what}, got {}", got.type_name()))
}

fn mismatch(path: impl Into<String>, reason: impl Into<String>) -> CodecError {
    CodecError::ShapeMismatch {
        path: path.into(),
        reason: reason.into(),
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn root_or(path: &str, type_name: &str) -> String {
    if path.is_empty() {
        type_name.to_string()
    } else {
        path.to_string()
    }
}
