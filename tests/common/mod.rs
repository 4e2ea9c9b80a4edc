//! Shared git-fixture helpers for the end-to-end scenario tests.
#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::process::Command;

use morph::git::Repository;

/// `git init` plus a first commit on `master`, with a deterministic identity.
pub fn init_repo_with_commit(dir: &Path) {
    Repository::init(dir).unwrap();
    let repo = Repository::at(dir);
    repo.set_config("user.email", "a@example.com").unwrap();
    repo.set_config("user.name", "A").unwrap();
    fs::write(dir.join("f"), "x").unwrap();
    run_git(dir, &["add", "f"]);
    run_git(dir, &["commit", "-m", "init", "--no-gpg-sign"]);
    run_git(dir, &["branch", "-M", "master"]);
}

pub fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn file_url(dir: &Path) -> String {
    format!("file://{}", dir.display())
}

pub fn write_morph(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(format!("{name}.morph")), content).unwrap();
}

pub fn commit_all(dir: &Path, message: &str) {
    run_git(dir, &["add", "-A"]);
    run_git(dir, &["commit", "-m", message, "--no-gpg-sign"]);
}
