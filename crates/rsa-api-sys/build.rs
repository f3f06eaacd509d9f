//! Build script for rsa-api-sys.
//!
//! The bindings themselves are hand-maintained in `src/lib.rs` because the
//! vendor header is small and stable. This script only emits linker
//! directives, and only when the `rsa-sdk` feature is enabled:
//!
//! 1. With `rsa-sdk`: link `libRSA_API`, searching `RSA_API_LIB_DIR` first
//! 2. Without feature: nothing is linked and the extern block is compiled out

fn main() {
    println!("cargo:rerun-if-env-changed=RSA_API_LIB_DIR");

    #[cfg(feature = "rsa-sdk")]
    link_vendor_library();
}

#[cfg(feature = "rsa-sdk")]
fn link_vendor_library() {
    println!("cargo:rustc-link-lib=dylib=RSA_API");

    if let Ok(dir) = std::env::var("RSA_API_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
        return;
    }

    // Default install locations of the Tektronix Linux API package
    let lib_paths = ["/usr/local/lib", "/usr/lib", "/opt/tekrsa/lib", "/opt/RSA_API/lib"];

    for path in lib_paths {
        if std::path::Path::new(path).join("libRSA_API.so").exists() {
            println!("cargo:rustc-link-search=native={}", path);
            break;
        }
    }
}
