use pb_rs::{ConfigBuilder, types::FileDescriptor};
use std::{env, fs};

const PROTOS: [&str; 2] = ["fileformat.proto", "osmformat.proto"];

fn main() {
    let out_dir = format!("{}/proto", env::var("OUT_DIR").unwrap());
    let in_dir = format!("{}/proto", env::var("CARGO_MANIFEST_DIR").unwrap());

    for proto in PROTOS {
        println!("cargo:rerun-if-changed={}/{}", in_dir, proto);
    }

    if fs::metadata(&out_dir).is_ok() {
        fs::remove_dir_all(&out_dir).unwrap();
    }
    fs::create_dir_all(&out_dir).unwrap();

    let protos: Vec<String> = PROTOS
        .iter()
        .map(|proto| format!("{}/{}", in_dir, proto))
        .collect();

    let config = ConfigBuilder::new(&protos, None, Some(&&out_dir), &[in_dir])
        .expect("could not generate pb-rs config");

    FileDescriptor::run(&config.build()).expect("could not generate proto files");
}
