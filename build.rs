// build.rs

use std::env;

fn main() {
    // CHATRELAY_VERSION lets packagers stamp a release string over the crate version.
    let version = env::var("CHATRELAY_VERSION")
        .or_else(|_| env::var("CARGO_PKG_VERSION"))
        .unwrap_or_else(|_| "dev".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=CARGO_PKG_VERSION={version}");
    println!("cargo:rustc-env=CHATRELAY_BUILD_PROFILE={profile}");
    println!("cargo:rerun-if-env-changed=CHATRELAY_VERSION");
}
