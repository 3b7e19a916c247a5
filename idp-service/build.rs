//! Build script for compiling the gRPC service definition.
//!
//! Generates the tonic server stubs from `proto/authgate.proto`; the
//! handwritten service implementation lives in `src/grpc`.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Rerun codegen when the proto changes
    println!("cargo:rerun-if-changed=proto/authgate.proto");

    tonic_build::configure()
        // Only the server side is needed; products bring their own stubs
        .build_server(true)
        .build_client(false)
        .compile_protos(&["proto/authgate.proto"], &["proto"])?;

    Ok(())
}
