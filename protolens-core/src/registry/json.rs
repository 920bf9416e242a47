//! Descriptors exported as JSON.
//!
//! Accepts the object shape produced by the google-protobuf JavaScript `toObject()` helpers,
//! where repeated fields are suffixed with `List` (`messageTypeList`, `fieldList`) and the
//! `package` field is spelled `pb_package`. Plain camelCase and snake_case keys are accepted as
//! well. Labels and types may be given either as integers or as enum value names
//! (`"LABEL_REPEATED"`, `"TYPE_STRING"`, or the short `"repeated"` / `"string"` forms).
//!
//! Only the parts of `FieldOptions` that carry constraints are kept: `uninterpretedOptionList`.
use super::RegistryError;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::uninterpreted_option::NamePart;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FieldOptions, FileDescriptorProto, MethodDescriptorProto, OneofDescriptorProto,
    ServiceDescriptorProto, UninterpretedOption,
};
use serde_json::{Map, Value};

/// Converts one JSON file descriptor.
pub fn file_from_json(value: &Value) -> Result<FileDescriptorProto, RegistryError> {
    let file = Node::root(value)?;

    Ok(FileDescriptorProto {
        name: Some(file.required_str("name")?),
        package: file.str(&["pb_package", "package"])?,
        dependency: file.strings("dependency")?,
        public_dependency: file.ints("publicDependency")?,
        weak_dependency: file.ints("weakDependency")?,
        message_type: file.map_list("messageType", message)?,
        enum_type: file.map_list("enumType", enumeration)?,
        service: file.map_list("service", service)?,
        extension: file.map_list("extension", field)?,
        syntax: file.str(&["syntax"])?,
        ..Default::default()
    })
}

fn message(node: &Node<'_>) -> Result<DescriptorProto, RegistryError> {
    Ok(DescriptorProto {
        name: Some(node.required_str("name")?),
        field: node.map_list("field", field)?,
        extension: node.map_list("extension", field)?,
        nested_type: node.map_list("nestedType", message)?,
        enum_type: node.map_list("enumType", enumeration)?,
        oneof_decl: node.map_list("oneofDecl", |n| {
            Ok(OneofDescriptorProto {
                name: Some(n.required_str("name")?),
                options: None,
            })
        })?,
        reserved_name: node.strings("reservedName")?,
        ..Default::default()
    })
}

fn field(node: &Node<'_>) -> Result<FieldDescriptorProto, RegistryError> {
    let options = node
        .child(&["options"])
        .map(|options| field_options(&options))
        .transpose()?;

    Ok(FieldDescriptorProto {
        name: Some(node.required_str("name")?),
        number: node.int(&["number"])?,
        label: node.enum_value(&["label"], "LABEL_", |s| Label::from_str_name(s).map(|l| l as i32))?,
        r#type: node.enum_value(&["type"], "TYPE_", |s| Type::from_str_name(s).map(|t| t as i32))?,
        type_name: node.str(&["typeName", "type_name"])?,
        extendee: node.str(&["extendee"])?,
        default_value: node.str(&["defaultValue", "default_value"])?,
        oneof_index: node.int(&["oneofIndex", "oneof_index"])?,
        json_name: node.str(&["jsonName", "json_name"])?,
        proto3_optional: node.bool(&["proto3Optional", "proto3_optional"])?,
        options,
    })
}

fn field_options(node: &Node<'_>) -> Result<FieldOptions, RegistryError> {
    Ok(FieldOptions {
        uninterpreted_option: node.map_list("uninterpretedOption", uninterpreted_option)?,
        ..Default::default()
    })
}

fn uninterpreted_option(node: &Node<'_>) -> Result<UninterpretedOption, RegistryError> {
    let name = node.map_list("name", |part| {
        Ok(NamePart {
            name_part: part.required_str_any(&["namePart", "name_part"])?,
            is_extension: part.bool(&["isExtension", "is_extension"])?.unwrap_or(false),
        })
    })?;

    Ok(UninterpretedOption {
        name,
        identifier_value: node.str(&["identifierValue", "identifier_value"])?,
        positive_int_value: node.uint(&["positiveIntValue", "positive_int_value"])?,
        negative_int_value: node.i64(&["negativeIntValue", "negative_int_value"])?,
        double_value: node.f64(&["doubleValue", "double_value"])?,
        string_value: node
            .str(&["stringValue", "string_value"])?
            .map(String::into_bytes),
        aggregate_value: node.str(&["aggregateValue", "aggregate_value"])?,
    })
}

fn enumeration(node: &Node<'_>) -> Result<EnumDescriptorProto, RegistryError> {
    Ok(EnumDescriptorProto {
        name: Some(node.required_str("name")?),
        value: node.map_list("value", |v| {
            Ok(EnumValueDescriptorProto {
                name: Some(v.required_str("name")?),
                number: v.int(&["number"])?,
                options: None,
            })
        })?,
        ..Default::default()
    })
}

fn service(node: &Node<'_>) -> Result<ServiceDescriptorProto, RegistryError> {
    Ok(ServiceDescriptorProto {
        name: Some(node.required_str("name")?),
        method: node.map_list("method", |m| {
            Ok(MethodDescriptorProto {
                name: Some(m.required_str("name")?),
                input_type: m.str(&["inputType", "input_type"])?,
                output_type: m.str(&["outputType", "output_type"])?,
                client_streaming: m.bool(&["clientStreaming", "client_streaming"])?,
                server_streaming: m.bool(&["serverStreaming", "server_streaming"])?,
                options: None,
            })
        })?,
        options: None,
    })
}

/// A JSON object plus the path that led to it, for error messages.
struct Node<'a> {
    object: &'a Map<String, Value>,
    path: String,
}

impl<'a> Node<'a> {
    fn root(value: &'a Value) -> Result<Self, RegistryError> {
        let object = value.as_object().ok_or_else(|| RegistryError::Json {
            path: "$".to_string(),
            reason: "expected an object".to_string(),
        })?;
        Ok(Self {
            object,
            path: "$".to_string(),
        })
    }

    fn error(&self, key: &str, reason: impl Into<String>) -> RegistryError {
        RegistryError::Json {
            path: format!("{}.{key}", self.path),
            reason: reason.into(),
        }
    }

    /// The first present, non-null value among `keys`.
    fn get(&self, keys: &[&str]) -> Option<(&'a Value, String)> {
        keys.iter().find_map(|&key| match self.object.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some((value, key.to_string())),
        })
    }

    fn child(&self, keys: &[&str]) -> Option<Node<'a>> {
        let (value, key) = self.get(keys)?;
        value.as_object().map(|object| Node {
            object,
            path: format!("{}.{key}", self.path),
        })
    }

    fn str(&self, keys: &[&str]) -> Result<Option<String>, RegistryError> {
        match self.get(keys) {
            None => Ok(None),
            Some((Value::String(s), _)) => Ok(Some(s.clone())),
            Some((_, key)) => Err(self.error(&key, "expected a string")),
        }
    }

    fn required_str(&self, key: &str) -> Result<String, RegistryError> {
        self.required_str_any(&[key])
    }

    fn required_str_any(&self, keys: &[&str]) -> Result<String, RegistryError> {
        self.str(keys)?
            .ok_or_else(|| self.error(keys[0], "missing required string"))
    }

    fn bool(&self, keys: &[&str]) -> Result<Option<bool>, RegistryError> {
        match self.get(keys) {
            None => Ok(None),
            Some((Value::Bool(b), _)) => Ok(Some(*b)),
            Some((_, key)) => Err(self.error(&key, "expected a boolean")),
        }
    }

    fn i64(&self, keys: &[&str]) -> Result<Option<i64>, RegistryError> {
        match self.get(keys) {
            None => Ok(None),
            Some((value, key)) => number_as_i64(value)
                .map(Some)
                .ok_or_else(|| self.error(&key, "expected an integer")),
        }
    }

    fn uint(&self, keys: &[&str]) -> Result<Option<u64>, RegistryError> {
        match self.i64(keys)? {
            None => Ok(None),
            Some(n) => u64::try_from(n)
                .map(Some)
                .map_err(|_| self.error(keys[0], "expected a non-negative integer")),
        }
    }

    fn int(&self, keys: &[&str]) -> Result<Option<i32>, RegistryError> {
        match self.i64(keys)? {
            None => Ok(None),
            Some(n) => i32::try_from(n)
                .map(Some)
                .map_err(|_| self.error(keys[0], "integer out of range")),
        }
    }

    fn f64(&self, keys: &[&str]) -> Result<Option<f64>, RegistryError> {
        match self.get(keys) {
            None => Ok(None),
            Some((value, key)) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.error(&key, "expected a number")),
        }
    }

    /// An enum given either as its number or as its value name, with or without `prefix`.
    fn enum_value(
        &self,
        keys: &[&str],
        prefix: &str,
        from_name: impl Fn(&str) -> Option<i32>,
    ) -> Result<Option<i32>, RegistryError> {
        match self.get(keys) {
            None => Ok(None),
            Some((Value::String(name), key)) => {
                let upper = name.to_ascii_uppercase();
                from_name(&upper)
                    .or_else(|| from_name(&format!("{prefix}{upper}")))
                    .map(Some)
                    .ok_or_else(|| self.error(&key, format!("unknown value '{name}'")))
            }
            Some(_) => self.int(keys),
        }
    }

    /// A repeated field, looked up as `<name>List`, `<name>` and its snake_case spelling.
    fn list(&self, name: &str) -> Result<Vec<Node<'a>>, RegistryError> {
        let suffixed = format!("{name}List");
        let snake = to_snake_case(name);

        let Some((value, key)) = self.get(&[suffixed.as_str(), name, snake.as_str()]) else {
            return Ok(Vec::new());
        };
        let items = value
            .as_array()
            .ok_or_else(|| self.error(&key, "expected an array"))?;

        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let path = format!("{}.{key}[{i}]", self.path);
                item.as_object()
                    .map(|object| Node {
                        object,
                        path: path.clone(),
                    })
                    .ok_or(RegistryError::Json {
                        path,
                        reason: "expected an object".to_string(),
                    })
            })
            .collect()
    }

    fn map_list<T>(
        &self,
        name: &str,
        convert: impl Fn(&Node<'a>) -> Result<T, RegistryError>,
    ) -> Result<Vec<T>, RegistryError> {
        self.list(name)?.iter().map(convert).collect()
    }

    fn scalar_list<T>(
        &self,
        name: &str,
        convert: impl Fn(&Value) -> Option<T>,
    ) -> Result<Vec<T>, RegistryError> {
        let suffixed = format!("{name}List");
        let snake = to_snake_case(name);

        let Some((value, key)) = self.get(&[suffixed.as_str(), name, snake.as_str()]) else {
            return Ok(Vec::new());
        };
        let items = value
            .as_array()
            .ok_or_else(|| self.error(&key, "expected an array"))?;

        items
            .iter()
            .map(|item| convert(item).ok_or_else(|| self.error(&key, "unexpected element")))
            .collect()
    }

    fn strings(&self, name: &str) -> Result<Vec<String>, RegistryError> {
        self.scalar_list(name, |v| v.as_str().map(str::to_string))
    }

    fn ints(&self, name: &str) -> Result<Vec<i32>, RegistryError> {
        self.scalar_list(name, |v| number_as_i64(v).and_then(|n| i32::try_from(n).ok()))
    }
}

/// JSON numbers, plus the decimal strings some exporters use for 64-bit values.
fn number_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_suffixed_keys_become_repeated_fields() {
        let file = file_from_json(&json!({
            "name": "a.proto",
            "pb_package": "pkg",
            "dependencyList": ["b.proto"],
            "messageTypeList": [{
                "name": "A",
                "fieldList": [
                    { "name": "tags", "number": 1, "label": 3, "type": 9, "jsonName": "tags" }
                ]
            }]
        }))
        .unwrap();

        assert_eq!(file.package(), "pkg");
        assert_eq!(file.dependency, vec!["b.proto"]);
        let field = &file.message_type[0].field[0];
        assert_eq!(field.label(), Label::Repeated);
        assert_eq!(field.r#type(), Type::String);
    }

    #[test]
    fn labels_and_types_accept_names() {
        let file = file_from_json(&json!({
            "name": "a.proto",
            "message_type": [{
                "name": "A",
                "field": [
                    { "name": "a", "number": 1, "label": "LABEL_OPTIONAL", "type": "TYPE_INT64" },
                    { "name": "b", "number": 2, "label": "repeated", "type": "bool" }
                ]
            }]
        }))
        .unwrap();

        let fields = &file.message_type[0].field;
        assert_eq!(fields[0].label(), Label::Optional);
        assert_eq!(fields[0].r#type(), Type::Int64);
        assert_eq!(fields[1].label(), Label::Repeated);
        assert_eq!(fields[1].r#type(), Type::Bool);
    }

    #[test]
    fn uninterpreted_options_are_kept() {
        let file = file_from_json(&json!({
            "name": "a.proto",
            "messageTypeList": [{
                "name": "A",
                "fieldList": [{
                    "name": "a",
                    "number": 1,
                    "type": 9,
                    "options": {
                        "uninterpretedOptionList": [{
                            "nameList": [{ "namePart": "validate.rules", "isExtension": true }],
                            "aggregateValue": "string: { min_len: 3 }"
                        }]
                    }
                }]
            }]
        }))
        .unwrap();

        let options = file.message_type[0].field[0].options.as_ref().unwrap();
        let option = &options.uninterpreted_option[0];
        assert_eq!(option.name[0].name_part, "validate.rules");
        assert!(option.name[0].is_extension);
        assert_eq!(option.aggregate_value(), "string: { min_len: 3 }");
    }

    #[test]
    fn errors_carry_the_json_path() {
        let err = file_from_json(&json!({
            "name": "a.proto",
            "messageTypeList": [{ "name": "A", "fieldList": [{ "name": "a", "label": "SOMETIMES" }] }]
        }))
        .unwrap_err();

        assert!(matches!(
            err,
            RegistryError::Json { ref path, .. } if path == "$.messageTypeList[0].fieldList[0].label"
        ));
    }

    #[test]
    fn registry_builds_from_json() {
        let registry = crate::registry::TypeRegistry::from_json_files(&[json!({
            "name": "a.proto",
            "pb_package": "pkg",
            "syntax": "proto3",
            "messageTypeList": [{
                "name": "A",
                "fieldList": [{ "name": "id", "number": 1, "label": 1, "type": 9 }]
            }]
        })])
        .unwrap();

        let message = registry.lookup_message("pkg.A").unwrap();
        assert!(message.get_field_by_name("id").is_some());
    }
}
