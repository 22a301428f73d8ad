fn main() {
    // Feature flags reach build scripts as CARGO_FEATURE_* env vars.
    if std::env::var_os("CARGO_FEATURE_TFLITE").is_some() {
        println!("cargo:rustc-link-lib=tensorflowlite_c");
    }
    if std::env::var_os("CARGO_FEATURE_TFLITE_GPU").is_some() {
        println!("cargo:rustc-link-lib=tensorflowlite_gpu_delegate");
    }
}
