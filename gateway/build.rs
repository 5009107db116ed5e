fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tell Cargo to rerun if the proto files change
    println!("cargo:rerun-if-changed=../proto/v1/plates.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["../proto/v1/plates.proto"], &["../proto"])?;

    Ok(())
}
