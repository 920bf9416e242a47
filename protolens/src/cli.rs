//! # CLI
//!
//! This module defines the command-line interface of `protolens` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring headers are `key:value`);
use clap::{Parser, Subcommand};
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "protolens",
    version,
    about = "Inspect, validate and call gRPC services through server reflection"
)]
pub struct Cli {
    /// The server URL to connect to (e.g. http://localhost:50051)
    pub url: String,

    /// Time budget of each reflection batch, in seconds
    #[arg(
        long = "reflection-timeout",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub reflection_timeout_secs: u64,

    /// Maximum number of dependency rounds when closing the import graph
    #[arg(long, default_value_t = 32)]
    pub max_closure_rounds: usize,

    /// Maximum size of an encoded request, in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    pub max_message_bytes: usize,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn reflection_timeout(&self) -> Duration {
        Duration::from_secs(self.reflection_timeout_secs)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List all services available on the server
    ///
    /// Fetches the list of exposed services from the server's reflection service.
    List,

    /// Describe a service, method, message or enum
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// protolens http://localhost:50051 describe examples.weather.WeatherService
    /// protolens http://localhost:50051 describe examples.weather.GetWeatherRequest
    /// ```
    Describe {
        /// Fully qualified symbol (e.g. my.package.Service, my.package.Service/Method)
        symbol: String,
    },

    /// Show the field constraints declared on messages
    Rules {
        /// Fully qualified message names (e.g. my.package.Message)
        #[arg(required = true)]
        messages: Vec<String>,
    },

    /// Check a JSON body against the constraints of a message, without calling anything
    Validate {
        /// Fully qualified message name (e.g. my.package.Message)
        message: String,
        /// JSON object body
        #[arg(long, value_parser = parse_body)]
        body: serde_json::Value,
    },

    /// Encode a JSON body as protobuf bytes, printed as hex
    Encode {
        /// Fully qualified message name (e.g. my.package.Message)
        message: String,
        /// JSON object body
        #[arg(long, value_parser = parse_body)]
        body: serde_json::Value,
        /// Wrap the message in a `google.protobuf.Any` envelope
        #[arg(long)]
        any: bool,
    },

    /// Decode hex protobuf bytes into JSON
    Decode {
        /// Fully qualified message name (e.g. my.package.Message)
        message: String,
        /// Hex encoded message bytes (whitespace is ignored)
        #[arg(value_parser = parse_hex)]
        bytes: HexBytes,
    },

    /// Perform a unary gRPC call
    ///
    /// The body is validated against the constraints of the request message before anything is
    /// sent to the server.
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// protolens http://localhost:50051 call examples.weather.WeatherService/GetWeather --body '{"location": "NYC"}'
    /// ```
    Call {
        /// Endpoint (package.Service/Method)
        #[arg(value_parser = parse_endpoint)]
        endpoint: (String, String),
        /// JSON object body
        #[arg(long, value_parser = parse_body)]
        body: serde_json::Value,

        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
}

fn parse_endpoint(value: &str) -> Result<(String, String), String> {
    let (service, method) = value.split_once('/').ok_or_else(|| {
        format!("Invalid endpoint format: '{value}'. Expected 'package.Service/Method'",)
    })?;

    if service.trim().is_empty() || method.trim().is_empty() {
        return Err("Service and Method names cannot be empty".to_string());
    }

    Ok((service.to_string(), method.to_string()))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}

fn parse_body(value: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(value).map_err(|e| format!("Invalid JSON: {e}"))
}

/// Raw bytes given on the command line as hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

fn parse_hex(value: &str) -> Result<HexBytes, String> {
    let digits: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(digits)
        .map(HexBytes)
        .map_err(|e| format!("Invalid hex: {e}"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn endpoint_is_split_on_the_slash() {
        assert_eq!(
            parse_endpoint("examples.weather.WeatherService/GetWeather").unwrap(),
            (
                "examples.weather.WeatherService".to_string(),
                "GetWeather".to_string()
            )
        );
        assert!(parse_endpoint("examples.weather.WeatherService").is_err());
        assert!(parse_endpoint("/GetWeather").is_err());
    }

    #[test]
    fn headers_and_hex_are_parsed() {
        assert_eq!(
            parse_header("x-api-key: secret").unwrap(),
            ("x-api-key".to_string(), "secret".to_string())
        );
        assert_eq!(parse_hex("0a 03 4e 59 43").unwrap().0, b"\n\x03NYC");
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
