//! S2: `branch` clones the root repo onto a fresh local branch and wires up
//! the system-branch config; re-using a branch name the root repo already
//! carries is an error, and the half-created branch directory is rolled
//! back.

mod common;

use common::*;
use morph::branch::{BranchError, BranchLifecycle};
use morph::git::Repository;
use morph::layout::Workspace;
use morph::repocache::{RepoAliasResolver, RepoCache};

#[test]
fn branch_clones_root_repo_onto_new_branch() {
    let origin = tempfile::tempdir().unwrap();
    init_repo_with_commit(origin.path());
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

    assert_eq!(branch.name, "new-feature");
    assert!(branch.dir.join(".morph-system-branch").join("config").exists());
    assert_eq!(branch.root_repo().unwrap(), repo_url);
    assert_eq!(branch.uuid().unwrap().len(), 32);

    let clone_dir = branch.find_repository(&repo_url).unwrap();
    assert_eq!(
        Repository::at(&clone_dir).get_config("morph.uuid").unwrap().map(|u| u.len()),
        Some(32)
    );
    let head = Repository::at(&clone_dir).run(&["symbolic-ref", "--short", "HEAD"]).unwrap();
    assert_eq!(head, "new-feature");
}

#[test]
fn branch_refuses_a_name_the_root_repo_already_carries() {
    let origin = tempfile::tempdir().unwrap();
    init_repo_with_commit(origin.path());
    run_git(origin.path(), &["branch", "new-feature"]);
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

    let err = lifecycle.branch(&repo_url, "new-feature", "master").unwrap_err();

    assert!(matches!(err, BranchError::AlreadyExists(ref name) if name == "new-feature"));
    assert_eq!(err.to_string(), "branch new-feature already exists");
    assert!(
        !workspace.root.join("new-feature").exists(),
        "the half-created branch directory must be rolled back"
    );
}
