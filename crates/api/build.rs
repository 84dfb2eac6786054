fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/balance.proto");

    // Fall back to the bundled protoc when the host has none configured.
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()?;
        // SAFETY: the build script is single-threaded here.
        unsafe { std::env::set_var("PROTOC", protoc) };
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/balance.proto"], &["proto"])?;
    Ok(())
}
