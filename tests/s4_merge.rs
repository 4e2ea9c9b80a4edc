//! S4: merging a source branch that has uncommitted changes aborts with an
//! uncommitted-changes error, and leaves the receiving branch's clone
//! untouched.

mod common;

use common::*;
use morph::branch::BranchLifecycle;
use morph::layout::Workspace;
use morph::merge::{MergeError, merge};
use morph::repocache::{RepoAliasResolver, RepoCache};

#[test]
fn merge_aborts_on_uncommitted_changes_and_leaves_target_untouched() {
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

    let source = lifecycle.branch(&repo_url, "branch-a", "master").unwrap();
    let target = lifecycle.branch(&repo_url, "branch-b", "master").unwrap();

    let source_root_dir = source.find_repository(&repo_url).unwrap();
    std::fs::write(source_root_dir.join("f"), "dirty, never committed").unwrap();

    let target_root_dir = target.find_repository(&repo_url).unwrap();
    let before = std::fs::read_to_string(target_root_dir.join("f")).unwrap();
    let before_head = morph::git::Repository::at(&target_root_dir).run(&["rev-parse", "HEAD"]).unwrap();

    let err = merge(&workspace, &target, &cache, &resolver, "branch-a").unwrap_err();

    assert!(matches!(err, MergeError::UncommittedChanges(ref repo) if repo == &repo_url));

    let after = std::fs::read_to_string(target_root_dir.join("f")).unwrap();
    let after_head = morph::git::Repository::at(&target_root_dir).run(&["rev-parse", "HEAD"]).unwrap();
    assert_eq!(before, after, "target working tree must be unchanged after an aborted merge");
    assert_eq!(before_head, after_head, "target must not gain a merge commit after an aborted merge");
}
