fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Pass through COUNTERSIGN_GIT_HASH from packaged builds
    println!("cargo:rerun-if-env-changed=COUNTERSIGN_GIT_HASH");
    if let Ok(hash) = std::env::var("COUNTERSIGN_GIT_HASH") {
        println!("cargo:rustc-env=COUNTERSIGN_GIT_HASH={}", hash);
    }
}
