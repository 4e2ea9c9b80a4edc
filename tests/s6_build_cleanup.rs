//! S6: when the build engine fails, every build ref that was pushed to
//! `origin` is deleted again before `build` returns its error.

mod common;

use common::*;
use morph::branch::BranchLifecycle;
use morph::build::{BuildEngine, BuildError, BuildRequest, build};
use morph::layout::Workspace;
use morph::repocache::{RepoAliasResolver, RepoCache};

struct FailingEngine;

impl BuildEngine for FailingEngine {
    fn build(&self, _request: &BuildRequest) -> Result<(), Box<dyn std::error::Error>> {
        Err("engine exploded".into())
    }
}

#[test]
fn build_cleans_up_pushed_refs_when_the_engine_fails() {
    let origin = tempfile::tempdir().unwrap();
    init_repo_with_commit(origin.path());
    write_morph(origin.path(), "foo", r#"{"name": "foo", "kind": "system", "strata": []}"#);
    commit_all(origin.path(), "add system");
    let repo_url = file_url(origin.path());

    let ws_dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::init(ws_dir.path()).unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let resolver = RepoAliasResolver::new(vec![]);
    let cache = RepoCache::new(cache_dir.path(), resolver.clone(), true);
    let lifecycle = BranchLifecycle {
        workspace: &workspace,
        cache: &cache,
        resolver: &resolver,
    };

    let branch = lifecycle.branch(&repo_url, "new-feature", "master").unwrap();

    let err = build(&branch, "foo", "baserock/builds", &FailingEngine).unwrap_err();
    assert!(matches!(err, BuildError::Engine(_)));

    let output = std::process::Command::new("git")
        .args(["branch", "--list", "baserock/builds/*"])
        .current_dir(origin.path())
        .output()
        .unwrap();
    let remaining = String::from_utf8_lossy(&output.stdout);
    assert!(
        remaining.trim().is_empty(),
        "build ref(s) were pushed but never cleaned up: {remaining}"
    );
}
