const REALTIME_PROTO: &str = "proto/gtfs-realtime.proto";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed={REALTIME_PROTO}");

    // Vendored protoc so the crate builds without a system protobuf install.
    let protoc_path = protoc_bin_vendored::protoc_bin_path()?;
    unsafe {
        std::env::set_var("PROTOC", protoc_path);
    }

    prost_build::Config::new().compile_protos(&[REALTIME_PROTO], &["proto/"])?;

    Ok(())
}
