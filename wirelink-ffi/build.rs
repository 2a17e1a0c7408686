//! Generates the C header for the exported API into OUT_DIR

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");

    let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => return,
    };

    let result = cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("WIRELINK_H")
        .with_pragma_once(true)
        .generate();

    match result {
        Ok(bindings) => {
            bindings.write_to_file(out_dir.join("wirelink.h"));
        }
        Err(e) => println!("cargo:warning=cbindgen failed, no header generated: {}", e),
    }
}
