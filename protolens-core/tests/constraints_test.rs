use bytes::Bytes;
use prost::Message;
use prost::encoding::{WireType, encode_key, encode_varint};
use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};
use protolens_core::config::SessionConfig;
use protolens_core::constraints::{self, ConstraintRules};
use protolens_core::registry::TypeRegistry;
use protolens_core::session::ServiceConnector;
use protolens_core::{ReflectionSession, Value};
use serde_json::json;
use weather_service::schema;

const REQUEST: &str = "examples.weather.GetWeatherRequest";
const FORECAST: &str = "examples.weather.GetWeatherForecastRequest";

fn setup_session() -> ReflectionSession<ServiceConnector<tonic::service::Routes>> {
    let routes = weather_service::weather_routes().expect("Failed to setup weather routes");
    ReflectionSession::with_connector(ServiceConnector(routes), SessionConfig::default())
}

#[tokio::test]
async fn test_rules_survive_server_reflection() {
    let session = setup_session();

    let schema = session
        .resolve_types("in-process", [REQUEST, FORECAST])
        .await
        .unwrap();
    let rules = schema.rules();

    assert_eq!(
        rules.rules_for(REQUEST, "location"),
        Some(&ConstraintRules {
            required: true,
            ..Default::default()
        })
    );
    assert_eq!(
        rules.rules_for(REQUEST, "units"),
        Some(&ConstraintRules {
            allowed_values: Some(vec!["metric".to_string(), "imperial".to_string()]),
            ..Default::default()
        })
    );
    assert_eq!(
        rules.rules_for(FORECAST, "location").and_then(|r| r.min_length),
        Some(1)
    );
    assert!(rules.rules_for(FORECAST, "date").is_some_and(|r| r.required));
    assert_eq!(rules.rules_for("examples.weather.GetWeatherResponse", "conditions"), None);
}

#[tokio::test]
async fn test_weather_request_scenarios() {
    let session = setup_session();
    let schema = session.resolve_types("in-process", [REQUEST]).await.unwrap();

    let cases = [
        (json!({ "location": "NYC", "units": "metric" }), vec![]),
        (
            json!({ "units": "metric" }),
            vec!["field 'location' is required"],
        ),
        (
            json!({ "location": "", "units": "metric" }),
            vec!["field 'location' is required"],
        ),
        (
            json!({ "location": "NYC", "units": "kelvin" }),
            vec!["field 'units' must be one of: metric, imperial"],
        ),
        (
            json!({ "units": "kelvin" }),
            vec![
                "field 'location' is required",
                "field 'units' must be one of: metric, imperial",
            ],
        ),
        // Unconstrained when absent.
        (json!({ "location": "NYC" }), vec![]),
    ];

    for (input, expected) in cases {
        let violations = schema.validate(REQUEST, &Value::from(input.clone()));
        assert_eq!(violations, expected, "input: {input}");
    }
}

#[tokio::test]
async fn test_nested_messages_are_validated_with_their_path() {
    let session = setup_session();
    let schema = session
        .resolve_types("in-process", ["examples.weather.BatchWeatherRequest"])
        .await
        .unwrap();

    let input = json!({
        "requests": [
            { "location": "NYC", "units": "metric" },
            { "location": "Paris", "units": "kelvin" },
            { "units": "imperial" }
        ]
    });

    let violations = schema.validate("examples.weather.BatchWeatherRequest", &input.into());

    assert_eq!(
        violations,
        [
            "field 'requests[1].units' must be one of: metric, imperial",
            "field 'requests[2].location' is required",
        ]
    );
}

#[tokio::test]
async fn test_constrained_fields_report_lists_every_rule() {
    let session = setup_session();
    let schema = session
        .resolve_types("in-process", [REQUEST, FORECAST])
        .await
        .unwrap();

    let constrained: Vec<_> = schema
        .rules()
        .constrained_fields()
        .into_iter()
        .map(|(message, field)| format!("{message}.{}", field.name))
        .collect();

    assert_eq!(constrained.len(), 4);
    assert!(constrained.contains(&format!("{REQUEST}.units")));
    assert!(constrained.contains(&format!("{FORECAST}.date")));
}

fn append_bytes(buf: &mut Vec<u8>, number: u32, payload: &[u8]) {
    encode_key(number, WireType::LengthDelimited, buf);
    encode_varint(payload.len() as u64, buf);
    buf.extend_from_slice(payload);
}

fn append_varint(buf: &mut Vec<u8>, number: u32, value: u64) {
    encode_key(number, WireType::Varint, buf);
    encode_varint(value, buf);
}

fn string_field(name: &str, number: i32) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::String as i32),
        ..Default::default()
    }
}

/// A request file whose field options carry compiled `validate.rules` and `field_behavior`
/// extensions, as emitted by protoc.
fn compiled_request_file() -> Vec<u8> {
    // (validate.rules).string = { min_len: 2, max_len: 8 }
    let mut string_rules = Vec::new();
    append_varint(&mut string_rules, 2, 2);
    append_varint(&mut string_rules, 3, 8);
    let mut field_rules = Vec::new();
    append_bytes(&mut field_rules, 14, &string_rules);
    let mut code_options = Vec::new();
    append_bytes(&mut code_options, constraints::VALIDATE_RULES_EXTENSION, &field_rules);

    // (google.api.field_behavior) = REQUIRED
    let mut name_options = Vec::new();
    append_varint(&mut name_options, constraints::FIELD_BEHAVIOR_EXTENSION, 2);

    let mut message = DescriptorProto {
        name: Some("CreateStation".to_string()),
        ..Default::default()
    }
    .encode_to_vec();
    for (field, options) in [
        (string_field("name", 1), name_options),
        (string_field("code", 2), code_options),
    ] {
        let mut encoded = field.encode_to_vec();
        append_bytes(&mut encoded, 8, &options);
        append_bytes(&mut message, 2, &encoded);
    }

    let mut file = FileDescriptorProto {
        name: Some("stations/station.proto".to_string()),
        package: Some("stations".to_string()),
        dependency: vec![
            schema::VALIDATE_FILE.to_string(),
            schema::FIELD_BEHAVIOR_FILE.to_string(),
        ],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
    .encode_to_vec();
    append_bytes(&mut file, 4, &message);
    file
}

#[test]
fn test_compiled_extensions_are_read_through_their_schema() {
    let descriptor_proto = DescriptorPool::global()
        .get_file_by_name(schema::DESCRIPTOR_FILE)
        .expect("descriptor.proto is part of the global pool")
        .file_descriptor_proto()
        .clone();

    let files: Vec<Bytes> = [
        descriptor_proto.encode_to_vec(),
        schema::validate_file().encode_to_vec(),
        schema::field_behavior_file().encode_to_vec(),
        compiled_request_file(),
    ]
    .into_iter()
    .map(Bytes::from)
    .collect();

    let registry = TypeRegistry::from_encoded(files).unwrap();
    assert!(registry.pool().get_extension_by_name("validate.rules").is_some());

    let rules = constraints::extract_rules(&registry);

    assert_eq!(
        rules.rules_for("stations.CreateStation", "name"),
        Some(&ConstraintRules {
            required: true,
            ..Default::default()
        })
    );
    assert_eq!(
        rules.rules_for("stations.CreateStation", "code"),
        Some(&ConstraintRules {
            min_length: Some(2),
            max_length: Some(8),
            ..Default::default()
        })
    );

    let violations = constraints::validate(
        "stations.CreateStation",
        &rules,
        &Value::map([("code", "X")]),
    );
    assert_eq!(
        violations,
        [
            "field 'name' is required",
            "field 'code' must be at least 2 characters",
        ]
    );
}
