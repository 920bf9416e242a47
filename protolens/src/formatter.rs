use crate::app::Output;
use colored::*;
use protolens_core::{
    Value,
    constraints::{ConstraintRules, FieldEntry, MessageRules},
    prost_reflect::{EnumDescriptor, Kind, MessageDescriptor, MethodDescriptor, ServiceDescriptor},
    session::SessionError,
    tonic::Status,
    tool::ToolCallError,
};

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

pub struct ServiceList(pub Vec<String>);

pub struct Violations(pub Vec<String>);

pub struct RulesReport(pub Vec<(String, FieldEntry)>);

pub struct DescribedMessage(pub MessageDescriptor, pub Option<MessageRules>);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", self.0)?;
        Ok(())
    }
}

impl From<Output> for FormattedString {
    fn from(output: Output) -> Self {
        match output {
            Output::Services(services) => ServiceList(services).into(),
            Output::Service(service) => service.into(),
            Output::Method(method) => method.into(),
            Output::Message(message, rules) => DescribedMessage(message, rules).into(),
            Output::Enum(enumeration) => enumeration.into(),
            Output::Rules(rules) => RulesReport(rules).into(),
            Output::Violations(violations) => Violations(violations).into(),
            Output::Encoded { type_url, bytes } => {
                let hex = hex::encode(bytes);
                match type_url {
                    Some(type_url) => FormattedString(format!(
                        "{} {}\n{} {}",
                        "type_url:".cyan(),
                        type_url,
                        "value:".cyan(),
                        hex
                    )),
                    None => FormattedString(hex),
                }
            }
            Output::Decoded(value) => value.into(),
            Output::Call(Ok(value)) => value.into(),
            Output::Call(Err(status)) => status.into(),
        }
    }
}

impl From<Value> for FormattedString {
    fn from(value: Value) -> Self {
        let value = serde_json::Value::from(value);
        FormattedString(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
    }
}

impl From<Status> for FormattedString {
    fn from(status: Status) -> Self {
        FormattedString(format!(
            "{} code={:?} message={:?}",
            "gRPC Failed:".red().bold(),
            status.code(),
            status.message()
        ))
    }
}

impl From<anyhow::Error> for FormattedString {
    fn from(err: anyhow::Error) -> Self {
        let code = err
            .chain()
            .find_map(|cause| {
                cause
                    .downcast_ref::<ToolCallError>()
                    .map(ToolCallError::code)
                    .or_else(|| cause.downcast_ref::<SessionError>().map(SessionError::code))
            })
            .map(|code| format!(" [{code}]"))
            .unwrap_or_default();

        FormattedString(format!(
            "{}{}\n\n'{:#}'",
            "Failed:".red().bold(),
            code.red(),
            err
        ))
    }
}

impl From<ServiceList> for FormattedString {
    fn from(ServiceList(services): ServiceList) -> Self {
        if services.is_empty() {
            return FormattedString("No services found.".yellow().to_string());
        }

        let mut out = String::new();
        out.push_str("Available Services:\n");
        for svc in services {
            out.push_str(&format!("  - {}\n", svc.green()));
        }
        FormattedString(out.trim_end().to_string())
    }
}

impl From<Violations> for FormattedString {
    fn from(Violations(violations): Violations) -> Self {
        if violations.is_empty() {
            return FormattedString("Valid.".green().to_string());
        }

        let mut out = format!("{}\n", "Validation failed:".red().bold());
        for violation in violations {
            out.push_str(&format!("  - {violation}\n"));
        }
        FormattedString(out.trim_end().to_string())
    }
}

impl From<RulesReport> for FormattedString {
    fn from(RulesReport(rules): RulesReport) -> Self {
        if rules.is_empty() {
            return FormattedString("No constrained fields.".yellow().to_string());
        }

        let mut out = String::new();
        let mut current = "";
        for (message, field) in &rules {
            if message != current {
                out.push_str(&format!("{} {}\n", "message".cyan(), message.green()));
                current = message;
            }
            out.push_str(&format!(
                "  {} {}\n",
                field.name,
                describe_rules(&field.rules).purple()
            ));
        }
        FormattedString(out.trim_end().to_string())
    }
}

/// `required, min_len=1, in=[a, b]`
fn describe_rules(rules: &ConstraintRules) -> String {
    let mut parts = Vec::new();
    if rules.required {
        parts.push("required".to_string());
    }
    if let Some(min) = rules.min_length {
        parts.push(format!("min_len={min}"));
    }
    if let Some(max) = rules.max_length {
        parts.push(format!("max_len={max}"));
    }
    if let Some(allowed) = &rules.allowed_values {
        parts.push(format!("in=[{}]", allowed.join(", ")));
    }
    parts.join(", ")
}

impl From<ServiceDescriptor> for FormattedString {
    fn from(service: ServiceDescriptor) -> Self {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {{\n",
            "service".cyan(),
            service.name().green()
        ));

        for method in service.methods() {
            out.push_str("  ");
            // Reuse the From<MethodDescriptor> implementation
            let method_fmt = FormattedString::from(method);
            out.push_str(&method_fmt.0);
            out.push_str("\n\n");
        }
        out.push('}');
        FormattedString(out)
    }
}

impl From<MethodDescriptor> for FormattedString {
    fn from(method: MethodDescriptor) -> Self {
        let input_stream = if method.is_client_streaming() {
            format!("{} ", "stream".cyan())
        } else {
            "".to_string()
        };
        let output_stream = if method.is_server_streaming() {
            format!("{} ", "stream".cyan())
        } else {
            "".to_string()
        };

        FormattedString(format!(
            "{} {}({}{}) {} ({}{});",
            "rpc".cyan(),
            method.name().green(),
            input_stream,
            method.input().full_name().yellow(),
            "returns".cyan(),
            output_stream,
            method.output().full_name().yellow()
        ))
    }
}

fn kind_name(kind: &Kind) -> ColoredString {
    match kind {
        Kind::Double => "double".yellow(),
        Kind::Float => "float".yellow(),
        Kind::Int32 => "int32".yellow(),
        Kind::Int64 => "int64".yellow(),
        Kind::Uint32 => "uint32".yellow(),
        Kind::Uint64 => "uint64".yellow(),
        Kind::Sint32 => "sint32".yellow(),
        Kind::Sint64 => "sint64".yellow(),
        Kind::Fixed32 => "fixed32".yellow(),
        Kind::Fixed64 => "fixed64".yellow(),
        Kind::Sfixed32 => "sfixed32".yellow(),
        Kind::Sfixed64 => "sfixed64".yellow(),
        Kind::Bool => "bool".yellow(),
        Kind::String => "string".yellow(),
        Kind::Bytes => "bytes".yellow(),
        Kind::Message(m) => m.full_name().yellow(),
        Kind::Enum(e) => e.full_name().yellow(),
    }
}

impl From<DescribedMessage> for FormattedString {
    fn from(DescribedMessage(message, rules): DescribedMessage) -> Self {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {{\n",
            "message".cyan(),
            message.name().green()
        ));

        for field in message.fields() {
            let type_name = if let Kind::Message(entry) = field.kind()
                && field.is_map()
            {
                format!(
                    "map<{}, {}>",
                    kind_name(&entry.map_entry_key_field().kind()),
                    kind_name(&entry.map_entry_value_field().kind())
                )
            } else if field.is_list() {
                format!("{} {}", "repeated".cyan(), kind_name(&field.kind()))
            } else {
                kind_name(&field.kind()).to_string()
            };

            let annotation = rules
                .as_ref()
                .and_then(|rules| rules.fields.iter().find(|f| f.name == field.name()))
                .filter(|entry| !entry.rules.is_empty())
                .map(|entry| format!(" // {}", describe_rules(&entry.rules)).purple().to_string())
                .unwrap_or_default();

            out.push_str(&format!(
                "  {}{} {} = {};{}\n",
                type_name,
                " ".normal(), // Reset color
                field.name(),
                field.number(),
                annotation
            ));
        }
        out.push('}');
        FormattedString(out)
    }
}

impl From<EnumDescriptor> for FormattedString {
    fn from(enum_desc: EnumDescriptor) -> Self {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {{\n",
            "enum".cyan(),
            enum_desc.name().green()
        ));

        for val in enum_desc.values() {
            out.push_str(&format!(
                "  {} = {};\n",
                val.name(),
                val.number().to_string().purple()
            ));
        }
        out.push('}');

        FormattedString(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rules_are_summarised_in_declaration_order() {
        colored::control::set_override(false);
        let rules = ConstraintRules {
            required: true,
            min_length: Some(1),
            max_length: None,
            allowed_values: Some(vec!["metric".into(), "imperial".into()]),
        };

        assert_eq!(describe_rules(&rules), "required, min_len=1, in=[metric, imperial]");
    }

    #[test]
    fn empty_violation_list_reads_as_valid() {
        colored::control::set_override(false);
        assert_eq!(FormattedString::from(Violations(vec![])).0, "Valid.");
    }
}
