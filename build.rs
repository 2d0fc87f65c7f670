use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .out_dir(&out_dir)
        .compile(&["proto/p2p_stream.proto"], &["proto/"])?;

    println!("cargo:rerun-if-changed=proto/p2p_stream.proto");
    println!("cargo:rerun-if-changed=proto/");

    Ok(())
}
