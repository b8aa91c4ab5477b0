//! Build script for generating protobuf code
//!
//! The wire types ship as hand-maintained stubs in `src/proto`. With the
//! `proto-gen` feature enabled the stubs are replaced by code generated
//! from `proto/` at build time, which requires `protoc`.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=../../proto/metric/v1/metric.proto");
    println!("cargo:rerun-if-changed=../../proto/score/v1/score.proto");

    #[cfg(feature = "proto-gen")]
    {
        let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

        tonic_build::configure()
            .build_server(true)
            .build_client(true)
            .out_dir(&out_dir)
            .compile(
                &[
                    "../../proto/metric/v1/metric.proto",
                    "../../proto/score/v1/score.proto",
                ],
                &["../../proto"],
            )?;
    }

    Ok(())
}
