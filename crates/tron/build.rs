fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_prost_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(&["proto/tron.proto"], &["proto"])?;
    println!("cargo:rerun-if-changed=proto/tron.proto");
    Ok(())
}
