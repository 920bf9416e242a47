//! Fixups applied to descriptors before they are linked.
//!
//! Descriptors that went through a non-protoc serializer (JSON exports, older reflection
//! servers) occasionally carry stale `oneof_index` values, missing labels or a `type_name`
//! without a `type`. `prost-reflect` rejects all of these, so they are repaired here.
//!
//! Options that were never compiled (`uninterpreted_option`) are dropped as well: the pool
//! resolves them while linking and fails when the extension they name is not in the file set.
//! The registry keeps the original bytes, so the constraint extractor still sees them.
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    UninterpretedOption,
};
use std::collections::HashSet;

/// Fully-qualified names (leading dot included) of the messages and enums of a file set.
#[derive(Default)]
struct KnownTypes {
    messages: HashSet<String>,
    enums: HashSet<String>,
}

impl KnownTypes {
    fn collect(files: &[FileDescriptorProto]) -> Self {
        let mut known = Self::default();
        for file in files {
            let prefix = match file.package() {
                "" => String::new(),
                package => format!(".{package}"),
            };
            for message in &file.message_type {
                known.add_message(&prefix, message);
            }
            for enumeration in &file.enum_type {
                known
                    .enums
                    .insert(format!("{prefix}.{}", enumeration.name()));
            }
        }
        known
    }

    fn add_message(&mut self, prefix: &str, message: &DescriptorProto) {
        let name = format!("{prefix}.{}", message.name());
        for nested in &message.nested_type {
            self.add_message(&name, nested);
        }
        for enumeration in &message.enum_type {
            self.enums.insert(format!("{name}.{}", enumeration.name()));
        }
        self.messages.insert(name);
    }

    fn kind_of(&self, type_name: &str) -> Option<Type> {
        let qualified = if type_name.starts_with('.') {
            type_name.to_string()
        } else {
            format!(".{type_name}")
        };

        if self.messages.contains(&qualified) {
            Some(Type::Message)
        } else if self.enums.contains(&qualified) {
            Some(Type::Enum)
        } else {
            None
        }
    }
}

/// Repairs every file in place and reports, per file, whether anything was changed.
pub(crate) fn normalize_files(files: &mut [FileDescriptorProto]) -> Vec<bool> {
    let known = KnownTypes::collect(files);

    files
        .iter_mut()
        .map(|file| {
            let mut changed = strip_uninterpreted_options(file);
            for message in &mut file.message_type {
                changed |= normalize_message(message, &known);
            }
            for extension in &mut file.extension {
                changed |= normalize_field(extension, &known, false);
            }
            changed
        })
        .collect()
}

/// Empties an options message's `uninterpreted_option` list, if it has one.
fn clear<T>(
    options: &mut Option<T>,
    uninterpreted: impl FnOnce(&mut T) -> &mut Vec<UninterpretedOption>,
) -> bool {
    match options.as_mut().map(uninterpreted) {
        Some(list) if !list.is_empty() => {
            list.clear();
            true
        }
        _ => false,
    }
}

fn strip_uninterpreted_options(file: &mut FileDescriptorProto) -> bool {
    let mut changed = clear(&mut file.options, |o| &mut o.uninterpreted_option);

    for message in &mut file.message_type {
        changed |= strip_message_options(message);
    }
    for enumeration in &mut file.enum_type {
        changed |= strip_enum_options(enumeration);
    }
    for extension in &mut file.extension {
        changed |= clear(&mut extension.options, |o| &mut o.uninterpreted_option);
    }
    for service in &mut file.service {
        changed |= clear(&mut service.options, |o| &mut o.uninterpreted_option);
        for method in &mut service.method {
            changed |= clear(&mut method.options, |o| &mut o.uninterpreted_option);
        }
    }

    changed
}

fn strip_message_options(message: &mut DescriptorProto) -> bool {
    let mut changed = clear(&mut message.options, |o| &mut o.uninterpreted_option);

    for field in message.field.iter_mut().chain(message.extension.iter_mut()) {
        changed |= clear(&mut field.options, |o| &mut o.uninterpreted_option);
    }
    for oneof in &mut message.oneof_decl {
        changed |= clear(&mut oneof.options, |o| &mut o.uninterpreted_option);
    }
    for range in &mut message.extension_range {
        changed |= clear(&mut range.options, |o| &mut o.uninterpreted_option);
    }
    for nested in &mut message.nested_type {
        changed |= strip_message_options(nested);
    }
    for enumeration in &mut message.enum_type {
        changed |= strip_enum_options(enumeration);
    }

    changed
}

fn strip_enum_options(enumeration: &mut EnumDescriptorProto) -> bool {
    let mut changed = clear(&mut enumeration.options, |o| &mut o.uninterpreted_option);
    for value in &mut enumeration.value {
        changed |= clear(&mut value.options, |o| &mut o.uninterpreted_option);
    }
    changed
}

fn normalize_message(message: &mut DescriptorProto, known: &KnownTypes) -> bool {
    let has_oneofs = !message.oneof_decl.is_empty();
    let mut changed = false;

    for field in &mut message.field {
        changed |= normalize_field(field, known, has_oneofs);
    }
    for extension in &mut message.extension {
        changed |= normalize_field(extension, known, false);
    }
    for nested in &mut message.nested_type {
        changed |= normalize_message(nested, known);
    }

    changed
}

fn normalize_field(field: &mut FieldDescriptorProto, known: &KnownTypes, has_oneofs: bool) -> bool {
    let mut changed = false;

    if !has_oneofs && field.oneof_index.is_some() {
        field.oneof_index = None;
        changed = true;
    }

    let label_is_valid = field.label.is_some_and(|l| Label::try_from(l).is_ok());
    if !label_is_valid {
        field.label = Some(Label::Optional as i32);
        changed = true;
    }

    let type_is_valid = field.r#type.is_some_and(|t| Type::try_from(t).is_ok());
    if !type_is_valid
        && let Some(kind) = field.type_name.as_deref().and_then(|n| known.kind_of(n))
    {
        field.r#type = Some(kind as i32);
        changed = true;
    }

    changed
}

#[cfg(test)]
mod test {
    use super::*;
    use prost_types::uninterpreted_option::NamePart;
    use prost_types::{FieldOptions, OneofDescriptorProto};

    fn file(messages: Vec<DescriptorProto>, enums: Vec<EnumDescriptorProto>) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("f.proto".to_string()),
            package: Some("pkg".to_string()),
            message_type: messages,
            enum_type: enums,
            ..Default::default()
        }
    }

    fn field(name: &str) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(1),
            label: Some(Label::Optional as i32),
            r#type: Some(Type::String as i32),
            ..Default::default()
        }
    }

    #[test]
    fn well_formed_files_are_left_untouched() {
        let mut files = vec![file(
            vec![DescriptorProto {
                name: Some("M".to_string()),
                field: vec![field("a")],
                ..Default::default()
            }],
            vec![],
        )];
        let before = files.clone();

        assert_eq!(normalize_files(&mut files), vec![false]);
        assert_eq!(files, before);
    }

    #[test]
    fn stale_oneof_index_is_stripped_only_without_oneofs() {
        let mut stale = field("a");
        stale.oneof_index = Some(0);

        let mut with_oneof = DescriptorProto {
            name: Some("WithOneof".to_string()),
            field: vec![stale.clone()],
            oneof_decl: vec![OneofDescriptorProto {
                name: Some("choice".to_string()),
                options: None,
            }],
            ..Default::default()
        };
        with_oneof.field[0].name = Some("b".to_string());

        let without_oneof = DescriptorProto {
            name: Some("WithoutOneof".to_string()),
            field: vec![stale],
            ..Default::default()
        };

        let mut files = vec![file(vec![with_oneof, without_oneof], vec![])];
        normalize_files(&mut files);

        assert_eq!(files[0].message_type[0].field[0].oneof_index, Some(0));
        assert_eq!(files[0].message_type[1].field[0].oneof_index, None);
    }

    #[test]
    fn missing_label_defaults_to_optional() {
        let mut unlabeled = field("a");
        unlabeled.label = None;
        let mut invalid = field("b");
        invalid.label = Some(42);

        let mut files = vec![file(
            vec![DescriptorProto {
                name: Some("M".to_string()),
                field: vec![unlabeled, invalid],
                ..Default::default()
            }],
            vec![],
        )];

        assert_eq!(normalize_files(&mut files), vec![true]);
        for field in &files[0].message_type[0].field {
            assert_eq!(field.label, Some(Label::Optional as i32));
        }
    }

    #[test]
    fn missing_type_is_inferred_from_type_name() {
        let mut to_message = field("inner");
        to_message.r#type = None;
        to_message.type_name = Some(".pkg.Outer.Inner".to_string());

        let mut to_enum = field("color");
        to_enum.r#type = None;
        to_enum.type_name = Some("pkg.Color".to_string());

        let outer = DescriptorProto {
            name: Some("Outer".to_string()),
            field: vec![to_message, to_enum],
            nested_type: vec![DescriptorProto {
                name: Some("Inner".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let color = EnumDescriptorProto {
            name: Some("Color".to_string()),
            ..Default::default()
        };

        let mut files = vec![file(vec![outer], vec![color])];
        normalize_files(&mut files);

        let fields = &files[0].message_type[0].field;
        assert_eq!(fields[0].r#type, Some(Type::Message as i32));
        assert_eq!(fields[1].r#type, Some(Type::Enum as i32));
    }

    #[test]
    fn uninterpreted_options_are_dropped_everywhere() {
        let option = UninterpretedOption {
            name: vec![NamePart {
                name_part: "validate.rules".to_string(),
                is_extension: true,
            }],
            aggregate_value: Some("string { min_len: 1 }".to_string()),
            ..Default::default()
        };
        let mut annotated = field("a");
        annotated.options = Some(FieldOptions {
            deprecated: Some(true),
            uninterpreted_option: vec![option.clone()],
            ..Default::default()
        });
        let nested = DescriptorProto {
            name: Some("Inner".to_string()),
            field: vec![annotated.clone()],
            ..Default::default()
        };

        let mut files = vec![file(
            vec![DescriptorProto {
                name: Some("M".to_string()),
                field: vec![annotated],
                nested_type: vec![nested],
                ..Default::default()
            }],
            vec![],
        )];

        assert_eq!(normalize_files(&mut files), vec![true]);

        let outer = &files[0].message_type[0];
        for field in [&outer.field[0], &outer.nested_type[0].field[0]] {
            let options = field.options.as_ref().unwrap();
            assert!(options.uninterpreted_option.is_empty());
            assert_eq!(options.deprecated, Some(true));
        }
    }
}
