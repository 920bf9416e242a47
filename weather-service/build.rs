use std::env::var;
use std::io::{Error, ErrorKind, Result};

fn main() -> Result<()> {
    let proto_files = &["proto/weather.proto"];
    let proto_folder = "proto";

    let out_dir = var("OUT_DIR").map_err(|e| Error::new(ErrorKind::NotFound, e))?;
    let descriptors_path = format!("{out_dir}/descriptors.bin");

    tonic_prost_build::configure()
        .file_descriptor_set_path(descriptors_path)
        .build_client(false)
        .compile_protos(proto_files, &[proto_folder])
}
