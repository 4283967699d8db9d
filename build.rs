use std::process::Command;

fn main() {
    let cargo_version = env!("CARGO_PKG_VERSION");

    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok();

    let git_hash = output
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok();

    let dirty = output
        .filter(|o| o.status.success())
        .map(|o| !o.stdout.is_empty())
        .unwrap_or(false);

    // v0.1.0 (abc1234) or v0.1.0-dev (abc1234)
    let version = if dirty {
        format!("v{}-dev ({})", cargo_version, git_hash)
    } else {
        format!("v{} ({})", cargo_version, git_hash)
    };

    println!("cargo:rustc-env=CHATRENDER_VERSION={}", version);

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
    println!("cargo:rerun-if-changed=Cargo.toml");
}
