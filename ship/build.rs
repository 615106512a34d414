//! Embeds the build identity printed by `ship-agent version`

use std::process::Command;

use chrono::{SecondsFormat, Utc};

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim().to_string()).filter(|t| !t.is_empty())
}

fn main() {
    let commit = git(&["describe", "--always", "--dirty", "--abbrev=12"])
        .unwrap_or_else(|| "unknown".to_string());
    let target = std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=SHIP_GIT_COMMIT={}", commit);
    println!("cargo:rustc-env=SHIP_BUILD_TARGET={}", target);
    println!(
        "cargo:rustc-env=SHIP_BUILD_TIME={}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    );

    if let Some(git_dir) = git(&["rev-parse", "--absolute-git-dir"]) {
        println!("cargo:rerun-if-changed={}/HEAD", git_dir);
        println!("cargo:rerun-if-changed={}/index", git_dir);
    }
    println!("cargo:rerun-if-changed=build.rs");
}
