//! The `examples.weather` schema, built as descriptors.
//!
//! Field rules are attached the way a descriptor that never went through a full compile carries
//! them: as `uninterpreted_option` entries.
use prost::Message;
use prost::encoding::{WireType, encode_key, encode_varint};
use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::uninterpreted_option::NamePart;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FieldOptions, FileDescriptorProto, FileDescriptorSet, MessageOptions, MethodDescriptorProto,
    OneofDescriptorProto, ServiceDescriptorProto, UninterpretedOption,
};

pub const WEATHER_FILE: &str = "examples/weather/weather.proto";
pub const COMMON_FILE: &str = "examples/weather/common.proto";
pub const TIMESTAMP_FILE: &str = "google/protobuf/timestamp.proto";
pub const VALIDATE_FILE: &str = "validate/validate.proto";
pub const FIELD_BEHAVIOR_FILE: &str = "google/api/field_behavior.proto";
pub const DESCRIPTOR_FILE: &str = "google/protobuf/descriptor.proto";
pub const SERVER_META_FILE: &str = "mcp/v0/server_meta.proto";
pub const META_ANCHOR_FILE: &str = "internal/meta_anchor.proto";

/// Field number of the `(mcp.v0.mcp_server_meta)` file option.
pub const SERVER_META_EXTENSION: u32 = 50_000;

pub const SERVICE: &str = "examples.weather.WeatherService";

fn field(name: &str, number: i32, kind: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(kind as i32),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

fn typed(name: &str, number: i32, kind: Type, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.to_string()),
        ..field(name, number, kind)
    }
}

fn repeated(mut field: FieldDescriptorProto) -> FieldDescriptorProto {
    field.label = Some(Label::Repeated as i32);
    field
}

fn in_oneof(mut field: FieldDescriptorProto, index: i32) -> FieldDescriptorProto {
    field.oneof_index = Some(index);
    field
}

fn with_options(mut field: FieldDescriptorProto, options: Vec<UninterpretedOption>) -> FieldDescriptorProto {
    field.options = Some(FieldOptions {
        uninterpreted_option: options,
        ..Default::default()
    });
    field
}

fn json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        match c {
            '_' => upper = true,
            c if upper => {
                out.push(c.to_ascii_uppercase());
                upper = false;
            }
            c => out.push(c),
        }
    }
    out
}

fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

fn enumeration(name: &str, values: &[&str]) -> EnumDescriptorProto {
    EnumDescriptorProto {
        name: Some(name.to_string()),
        value: values
            .iter()
            .enumerate()
            .map(|(i, value)| EnumValueDescriptorProto {
                name: Some(value.to_string()),
                number: Some(i as i32),
                options: None,
            })
            .collect(),
        ..Default::default()
    }
}

/// An option spelled `(first).rest.of.path`.
fn option_name(path: &[&str]) -> Vec<NamePart> {
    path.iter()
        .enumerate()
        .map(|(i, part)| NamePart {
            name_part: part.to_string(),
            is_extension: i == 0,
        })
        .collect()
}

/// `[(google.api.field_behavior) = REQUIRED]`
pub fn required_option() -> UninterpretedOption {
    UninterpretedOption {
        name: option_name(&["google.api.field_behavior"]),
        identifier_value: Some("REQUIRED".to_string()),
        ..Default::default()
    }
}

/// `[(validate.rules).string = { in: [...] }]`
pub fn string_in_option(values: &[&str]) -> UninterpretedOption {
    let quoted: Vec<_> = values.iter().map(|v| format!("\"{v}\"")).collect();
    UninterpretedOption {
        name: option_name(&["validate.rules", "string"]),
        aggregate_value: Some(format!("in: [{}]", quoted.join(", "))),
        ..Default::default()
    }
}

/// `[(validate.rules).string.min_len = N]`
pub fn min_len_option(min: u64) -> UninterpretedOption {
    UninterpretedOption {
        name: option_name(&["validate.rules", "string", "min_len"]),
        positive_int_value: Some(min),
        ..Default::default()
    }
}

pub fn timestamp_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(TIMESTAMP_FILE.to_string()),
        package: Some("google.protobuf".to_string()),
        message_type: vec![message(
            "Timestamp",
            vec![field("seconds", 1, Type::Int64), field("nanos", 2, Type::Int32)],
        )],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

pub fn common_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(COMMON_FILE.to_string()),
        package: Some("examples.weather".to_string()),
        message_type: vec![message(
            "Coordinates",
            vec![
                field("latitude", 1, Type::Double),
                field("longitude", 2, Type::Double),
            ],
        )],
        enum_type: vec![enumeration(
            "Condition",
            &["CONDITION_UNSPECIFIED", "SUNNY", "CLOUDY", "RAIN"],
        )],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

/// Every scalar kind plus lists, maps, nested and imported messages, a oneof and a proto3
/// `optional` field.
fn all_kinds() -> DescriptorProto {
    let counts_entry = DescriptorProto {
        name: Some("CountsEntry".to_string()),
        field: vec![field("key", 1, Type::String), field("value", 2, Type::Int32)],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut nickname = in_oneof(field("nickname", 15, Type::String), 1);
    nickname.proto3_optional = Some(true);

    DescriptorProto {
        name: Some("AllKinds".to_string()),
        field: vec![
            field("text", 1, Type::String),
            field("small", 2, Type::Int32),
            field("large", 3, Type::Int64),
            field("small_unsigned", 4, Type::Uint32),
            field("large_unsigned", 5, Type::Uint64),
            field("flag", 6, Type::Bool),
            field("precise", 7, Type::Double),
            field("approximate", 8, Type::Float),
            field("raw", 9, Type::Bytes),
            typed("condition", 10, Type::Enum, ".examples.weather.Condition"),
            repeated(field("tags", 11, Type::String)),
            repeated(typed(
                "counts",
                12,
                Type::Message,
                ".examples.weather.AllKinds.CountsEntry",
            )),
            typed("position", 13, Type::Message, ".examples.weather.Coordinates"),
            typed("inner", 14, Type::Message, ".examples.weather.AllKinds.Inner"),
            nickname,
            typed("observed_at", 16, Type::Message, ".google.protobuf.Timestamp"),
            in_oneof(field("by_name", 17, Type::String), 0),
            in_oneof(field("by_id", 18, Type::Int64), 0),
        ],
        nested_type: vec![
            message("Inner", vec![field("note", 1, Type::String)]),
            counts_entry,
        ],
        oneof_decl: vec![
            OneofDescriptorProto {
                name: Some("lookup".to_string()),
                options: None,
            },
            OneofDescriptorProto {
                name: Some("_nickname".to_string()),
                options: None,
            },
        ],
        ..Default::default()
    }
}

pub fn weather_file() -> FileDescriptorProto {
    let request = message(
        "GetWeatherRequest",
        vec![
            with_options(field("location", 1, Type::String), vec![required_option()]),
            with_options(
                field("units", 2, Type::String),
                vec![string_in_option(&["metric", "imperial"])],
            ),
        ],
    );

    let response = message(
        "GetWeatherResponse",
        vec![
            field("temperature_c", 1, Type::Double),
            field("conditions", 2, Type::String),
            field("humidity", 3, Type::Int32),
        ],
    );

    let forecast_request = message(
        "GetWeatherForecastRequest",
        vec![
            with_options(field("location", 1, Type::String), vec![min_len_option(1)]),
            with_options(field("date", 2, Type::String), vec![required_option()]),
        ],
    );

    let forecast_response = message(
        "GetWeatherForecastResponse",
        vec![
            field("temperature_c", 1, Type::Double),
            field("conditions", 2, Type::String),
            field("humidity", 3, Type::Int32),
            field("date", 4, Type::String),
            field("location", 5, Type::String),
        ],
    );

    let batch = message(
        "BatchWeatherRequest",
        vec![repeated(typed(
            "requests",
            1,
            Type::Message,
            ".examples.weather.GetWeatherRequest",
        ))],
    );

    let method = |name: &str, input: &str, output: &str| MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(format!(".examples.weather.{input}")),
        output_type: Some(format!(".examples.weather.{output}")),
        ..Default::default()
    };

    FileDescriptorProto {
        name: Some(WEATHER_FILE.to_string()),
        package: Some("examples.weather".to_string()),
        dependency: vec![COMMON_FILE.to_string(), TIMESTAMP_FILE.to_string()],
        message_type: vec![
            request,
            response,
            forecast_request,
            forecast_response,
            batch,
            all_kinds(),
        ],
        service: vec![ServiceDescriptorProto {
            name: Some("WeatherService".to_string()),
            method: vec![
                method("GetWeather", "GetWeatherRequest", "GetWeatherResponse"),
                method(
                    "GetWeatherForecast",
                    "GetWeatherForecastRequest",
                    "GetWeatherForecastResponse",
                ),
            ],
            options: None,
        }],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

/// A subset of protoc-gen-validate's `validate/validate.proto`: the rules understood by the
/// constraint extractor, at their upstream field numbers.
pub fn validate_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(VALIDATE_FILE.to_string()),
        package: Some("validate".to_string()),
        dependency: vec![DESCRIPTOR_FILE.to_string()],
        message_type: vec![
            message(
                "FieldRules",
                vec![
                    typed("string", 14, Type::Message, ".validate.StringRules"),
                    typed("enum", 16, Type::Message, ".validate.EnumRules"),
                    typed("message", 17, Type::Message, ".validate.MessageRules"),
                ],
            ),
            message(
                "StringRules",
                vec![
                    field("min_len", 2, Type::Uint64),
                    field("max_len", 3, Type::Uint64),
                    repeated(field("in", 10, Type::String)),
                    field("len", 19, Type::Uint64),
                ],
            ),
            message("EnumRules", vec![repeated(field("in", 3, Type::Int32))]),
            message("MessageRules", vec![field("required", 2, Type::Bool)]),
        ],
        extension: vec![FieldDescriptorProto {
            extendee: Some(".google.protobuf.FieldOptions".to_string()),
            ..typed("rules", 1071, Type::Message, ".validate.FieldRules")
        }],
        syntax: Some("proto2".to_string()),
        ..Default::default()
    }
}

/// A subset of `google/api/field_behavior.proto`.
pub fn field_behavior_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(FIELD_BEHAVIOR_FILE.to_string()),
        package: Some("google.api".to_string()),
        dependency: vec![DESCRIPTOR_FILE.to_string()],
        enum_type: vec![enumeration(
            "FieldBehavior",
            &[
                "FIELD_BEHAVIOR_UNSPECIFIED",
                "OPTIONAL",
                "REQUIRED",
                "OUTPUT_ONLY",
                "INPUT_ONLY",
                "IMMUTABLE",
            ],
        )],
        extension: vec![FieldDescriptorProto {
            extendee: Some(".google.protobuf.FieldOptions".to_string()),
            ..repeated(typed(
                "field_behavior",
                1052,
                Type::Enum,
                ".google.api.FieldBehavior",
            ))
        }],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

/// `google/protobuf/descriptor.proto`, as bundled with `prost-reflect`.
pub fn descriptor_file() -> Vec<u8> {
    DescriptorPool::global()
        .get_file_by_name(DESCRIPTOR_FILE)
        .map(|file| file.file_descriptor_proto().encode_to_vec())
        .unwrap_or_default()
}

/// Declares `ServerMeta` and the `FileOptions` extension carrying it.
pub fn server_meta_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(SERVER_META_FILE.to_string()),
        package: Some("mcp.v0".to_string()),
        dependency: vec![DESCRIPTOR_FILE.to_string()],
        message_type: vec![message(
            "ServerMeta",
            vec![
                field("server_id", 1, Type::String),
                field("server_version", 2, Type::String),
            ],
        )],
        extension: vec![FieldDescriptorProto {
            extendee: Some(".google.protobuf.FileOptions".to_string()),
            ..typed(
                "mcp_server_meta",
                SERVER_META_EXTENSION as i32,
                Type::Message,
                ".mcp.v0.ServerMeta",
            )
        }],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

fn append_bytes(buf: &mut Vec<u8>, number: u32, payload: &[u8]) {
    encode_key(number, WireType::LengthDelimited, buf);
    encode_varint(payload.len() as u64, buf);
    buf.extend_from_slice(payload);
}

/// An encoded file with no definitions whose options carry `ServerMeta { id, version }`.
///
/// `prost_types::FileOptions` cannot hold extensions, so the options are appended by hand.
pub fn meta_anchor_file(server_id: &str, server_version: &str) -> Vec<u8> {
    let mut meta = Vec::new();
    append_bytes(&mut meta, 1, server_id.as_bytes());
    append_bytes(&mut meta, 2, server_version.as_bytes());

    let mut options = Vec::new();
    append_bytes(&mut options, SERVER_META_EXTENSION, &meta);

    let mut file = FileDescriptorProto {
        name: Some(META_ANCHOR_FILE.to_string()),
        package: Some("mcp.v0.meta".to_string()),
        dependency: vec![SERVER_META_FILE.to_string()],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
    .encode_to_vec();
    append_bytes(&mut file, 8, &options);
    file
}

/// The files served by the weather server: the service file and its imports.
pub fn file_descriptor_set() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![timestamp_file(), common_file(), weather_file()],
    }
}

/// Every file of [`file_descriptor_set`], encoded.
pub fn encoded_files() -> Vec<(String, Vec<u8>)> {
    file_descriptor_set()
        .file
        .into_iter()
        .map(|file| (file.name().to_string(), file.encode_to_vec()))
        .collect()
}
