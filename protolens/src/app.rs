//! # Command Orchestration
//!
//! Runs one parsed command against a [`ReflectionSession`] and returns what should be printed.
//!
//! Every command resolves the schema it needs through the session first, so the descriptors
//! fetched for `call` are the same ones its body is validated and encoded with.
use crate::cli::{Commands, HexBytes};
use anyhow::Context;
use protolens_core::constraints::{FieldEntry, MessageRules};
use protolens_core::prost_reflect::{
    EnumDescriptor, MessageDescriptor, MethodDescriptor, ServiceDescriptor,
};
use protolens_core::tonic;
use protolens_core::{ReflectionSession, ToolDescriptor, Value};

pub enum Output {
    Services(Vec<String>),
    Service(ServiceDescriptor),
    Method(MethodDescriptor),
    Message(MessageDescriptor, Option<MessageRules>),
    Enum(EnumDescriptor),
    Rules(Vec<(String, FieldEntry)>),
    Violations(Vec<String>),
    Encoded {
        type_url: Option<String>,
        bytes: Vec<u8>,
    },
    Decoded(Value),
    Call(Result<Value, tonic::Status>),
}

pub async fn run(
    session: &ReflectionSession,
    url: &str,
    command: Commands,
) -> anyhow::Result<Output> {
    match command {
        Commands::List => Ok(Output::Services(session.list_services(url).await?)),

        Commands::Describe { symbol } => describe(session, url, &symbol).await,

        Commands::Rules { messages } => {
            let schema = session.resolve_types(url, messages.iter().cloned()).await?;
            let rules = schema
                .rules()
                .constrained_fields()
                .into_iter()
                .filter(|(message, _)| messages.iter().any(|m| m == message))
                .map(|(message, field)| (message.to_string(), field.clone()))
                .collect();
            Ok(Output::Rules(rules))
        }

        Commands::Validate { message, body } => {
            let schema = session.resolve_types(url, [message.as_str()]).await?;
            schema.registry().lookup_message(&message)?;
            Ok(Output::Violations(schema.validate(&message, &body.into())))
        }

        Commands::Encode { message, body, any } => {
            let schema = session.resolve_types(url, [message.as_str()]).await?;
            let body = Value::from(body);

            let violations = schema.validate(&message, &body);
            anyhow::ensure!(
                violations.is_empty(),
                "Argument validation failed: {}",
                violations.join("; ")
            );

            if any {
                let envelope = schema.encode_any(&message, &body)?;
                Ok(Output::Encoded {
                    type_url: Some(envelope.type_url),
                    bytes: envelope.value,
                })
            } else {
                Ok(Output::Encoded {
                    type_url: None,
                    bytes: schema.encode(&message, &body)?,
                })
            }
        }

        Commands::Decode {
            message,
            bytes: HexBytes(bytes),
        } => {
            let schema = session.resolve_types(url, [message.as_str()]).await?;
            Ok(Output::Decoded(schema.decode(&message, &bytes)?))
        }

        Commands::Call {
            endpoint: (service, method),
            body,
            headers,
        } => {
            let schema = session.resolve_types(url, [service.as_str()]).await?;
            let descriptor = schema.registry().lookup_method(&service, &method)?;

            let tool = ToolDescriptor {
                name: format!("{service}/{method}"),
                input_type: descriptor.input().full_name().to_string(),
                output_type: descriptor.output().full_name().to_string(),
                service,
                method,
            };

            anyhow::ensure!(
                !descriptor.is_client_streaming() && !descriptor.is_server_streaming(),
                "'{}' is a streaming method; only unary methods can be called",
                tool.name
            );

            let result = session
                .call_tool(url, &tool, &body.into(), headers)
                .await
                .with_context(|| format!("Calling '{}' failed", tool.name))?;

            Ok(Output::Call(result))
        }
    }
}

async fn describe(
    session: &ReflectionSession,
    url: &str,
    symbol: &str,
) -> anyhow::Result<Output> {
    // `pkg.Service/Method` is accepted as a spelling of `pkg.Service.Method`.
    let symbol = symbol.replacen('/', ".", 1);
    let schema = session.resolve_types(url, [symbol.as_str()]).await?;
    let registry = schema.registry();

    if let Ok(service) = registry.lookup_service(&symbol) {
        return Ok(Output::Service(service));
    }
    if let Ok(message) = registry.lookup_message(&symbol) {
        let rules = schema.rules().message(&symbol).cloned();
        return Ok(Output::Message(message, rules));
    }
    if let Ok(enumeration) = registry.lookup_enum(&symbol) {
        return Ok(Output::Enum(enumeration));
    }

    let (service, method) = symbol
        .rsplit_once('.')
        .with_context(|| format!("'{symbol}' is not a fully qualified name"))?;
    Ok(Output::Method(registry.lookup_method(service, method)?))
}
