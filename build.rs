fn main(){
    println!("cargo:rerun-if-changed=src/ffi/mod.rs");

    let crate_dir = match std::env::var("CARGO_MANIFEST_DIR"){
        Ok(dir) => dir,
        Err(_) => return,
    };

    let mut config = cbindgen::Config::default();
    config.language = cbindgen::Language::C;
    config.include_guard = Some("AUV_STATION_H".to_string());

    //header generation is best-effort, the rlib does not need it
    match cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) =>{
            bindings.write_to_file("include/auv_station.h");
        }
        Err(e) =>{
            println!("cargo:warning=unable to generate C bindings: {}", e);
        }
    }
}
