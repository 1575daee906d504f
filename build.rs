use std::env;
use std::process::Command;
use time::OffsetDateTime;

/// Version shown by `--version`: the package version, suffixed with `-dev`
/// unless HEAD carries the matching `v<version>` tag. Release builds skip git.
fn display_version(package_version: &str) -> String {
    if env::var("PROFILE").is_ok_and(|p| p == "release") {
        return package_version.to_string();
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/tags");

    let tag = Command::new("git")
        .args(["describe", "--tags", "--exact-match"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string());

    if tag.as_deref() == Some(format!("v{package_version}").as_str()) {
        package_version.to_string()
    } else {
        format!("{package_version}-dev")
    }
}

fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    let build_year = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(|epoch| OffsetDateTime::from_unix_timestamp(epoch).ok())
        .map(|dt| dt.year())
        .unwrap_or_else(|| OffsetDateTime::now_utc().year());
    println!("cargo:rustc-env=APP_BUILD_YEAR={build_year}");

    let package_version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    println!(
        "cargo:rustc-env=APP_VERSION_DISPLAY={}",
        display_version(&package_version)
    );
}
