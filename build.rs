fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        let protoc_path = protoc_bin_vendored::protoc_bin_path()?;
        std::env::set_var("PROTOC", protoc_path);
    }

    // Compile the prover wire protocol
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .out_dir("src/proto")
        .compile_protos(&["proto/aggregator.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/aggregator.proto");

    Ok(())
}
