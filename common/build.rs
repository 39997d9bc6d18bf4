use std::env;

/// Bindings and the reflection descriptor are committed under `src/prost`,
/// so regular builds do not need `protoc`. Set `ECHO_REGENERATE_PROTO=1`
/// after editing `proto/echo.proto`.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/echo.proto");
    println!("cargo:rerun-if-env-changed=ECHO_REGENERATE_PROTO");

    if env::var_os("ECHO_REGENERATE_PROTO").is_some() {
        tonic_build::configure()
            .out_dir("src/prost")
            .file_descriptor_set_path("src/prost/echo_descriptor.bin")
            .compile_protos(&["proto/echo.proto"], &["proto"])?;
    }
    Ok(())
}
