use std::io::Result;

fn main() -> Result<()> {
    tonic_build::configure()
        .type_attribute(".", "#[allow(clippy::large_enum_variant)]")
        .compile_protos(
            &["proto/scheduler.proto", "proto/agent.proto", "proto/inference.proto"],
            &["proto/"],
        )?;

    println!("cargo:rerun-if-changed=proto/scheduler.proto");
    println!("cargo:rerun-if-changed=proto/agent.proto");
    println!("cargo:rerun-if-changed=proto/inference.proto");
    Ok(())
}
