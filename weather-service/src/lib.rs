//! # Weather Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide gRPC servers and descriptors for
//! integration testing `protolens`. It is not intended for production use.
//!
//! * [`schema`] builds the `examples.weather` descriptors, with field rules attached.
//! * [`Weather`] answers the unary `WeatherService` methods, served through the generated
//!   [`WeatherServiceServer`].
//! * [`reflection_service`] exposes the schema through `tonic-reflection`.
//! * [`ScriptedReflection`] is a reflection server with canned answers and failure modes.
pub mod schema;
mod scripted;
mod server;

pub mod pb {
    include!(concat!(env!("OUT_DIR"), "/examples.weather.rs"));
}

pub use pb::weather_service_server::{WeatherService, WeatherServiceServer};
pub use scripted::{ScriptedReflection, StreamEnding};
pub use server::Weather;

use prost::Message;
use tonic::service::Routes;
use tonic_reflection::server::v1::{ServerReflection, ServerReflectionServer};

/// The descriptors `protoc` produced for `proto/weather.proto`.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("descriptors");

pub fn reflection_service()
-> Result<ServerReflectionServer<impl ServerReflection>, tonic_reflection::server::Error> {
    tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(schema::file_descriptor_set())
        .build_v1()
}

/// The weather service and its reflection service, ready to be called in-process.
pub fn weather_routes() -> Result<Routes, tonic_reflection::server::Error> {
    Ok(Routes::new(reflection_service()?).add_service(WeatherServiceServer::new(Weather)))
}

/// A [`ScriptedReflection`] serving every file of the weather schema.
pub fn scripted_weather() -> ScriptedReflection {
    let mut scripted = ScriptedReflection::new().with_services(&[schema::SERVICE]);
    for (name, raw) in schema::encoded_files() {
        let defined: &[&str] = match name.as_str() {
            schema::TIMESTAMP_FILE => &["google.protobuf.Timestamp"],
            schema::COMMON_FILE => &["examples.weather.Coordinates", "examples.weather.Condition"],
            _ => &[
                schema::SERVICE,
                "examples.weather.WeatherService.GetWeather",
                "examples.weather.WeatherService.GetWeatherForecast",
                "examples.weather.GetWeatherRequest",
                "examples.weather.GetWeatherResponse",
                "examples.weather.GetWeatherForecastRequest",
                "examples.weather.GetWeatherForecastResponse",
                "examples.weather.BatchWeatherRequest",
                "examples.weather.AllKinds",
            ],
        };
        scripted = scripted.with_file(&name, raw, defined);
    }
    scripted
}

/// [`scripted_weather`], also publishing the server meta anchor for `server_version`.
pub fn scripted_weather_with_meta(server_version: &str) -> ScriptedReflection {
    scripted_weather()
        .with_file(schema::DESCRIPTOR_FILE, schema::descriptor_file(), &[])
        .with_file(
            schema::SERVER_META_FILE,
            schema::server_meta_file().encode_to_vec(),
            &["mcp.v0.ServerMeta"],
        )
        .with_file(
            schema::META_ANCHOR_FILE,
            schema::meta_anchor_file("mcp-weather", server_version),
            &[],
        )
}
