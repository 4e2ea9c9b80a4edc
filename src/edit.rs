//! Edit propagator (component E): rewrites a stratum/chunk's `ref` to the
//! current system branch, fetching whatever repos that touches.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::branch::{BranchError, clone_repo_into, repo_subpath};
use crate::changelog::ChangeLog;
use crate::git::{GitError, Repository};
use crate::layout::{LayoutError, SystemBranch};
use crate::morphology::{Collection, EntryExt, Morphology, MorphologyError};
use crate::repocache::{RepoAliasResolver, RepoCache, RepoCacheError};

#[derive(Debug)]
pub enum EditError {
    Io(std::io::Error),
    Morphology(MorphologyError),
    Git(GitError),
    Branch(BranchError),
    RepoCache(RepoCacheError),
    Layout(LayoutError),
    RepoNotFound(String),
}

impl From<std::io::Error> for EditError {
    fn from(e: std::io::Error) -> Self {
        EditError::Io(e)
    }
}
impl From<MorphologyError> for EditError {
    fn from(e: MorphologyError) -> Self {
        EditError::Morphology(e)
    }
}
impl From<GitError> for EditError {
    fn from(e: GitError) -> Self {
        EditError::Git(e)
    }
}
impl From<BranchError> for EditError {
    fn from(e: BranchError) -> Self {
        EditError::Branch(e)
    }
}
impl From<RepoCacheError> for EditError {
    fn from(e: RepoCacheError) -> Self {
        EditError::RepoCache(e)
    }
}
impl From<LayoutError> for EditError {
    fn from(e: LayoutError) -> Self {
        EditError::Layout(e)
    }
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditError::Io(e) => write!(f, "{e}"),
            EditError::Morphology(e) => write!(f, "{e}"),
            EditError::Git(e) => write!(f, "{e}"),
            EditError::Branch(e) => write!(f, "{e}"),
            EditError::RepoCache(e) => write!(f, "{e}"),
            EditError::Layout(e) => write!(f, "{e}"),
            EditError::RepoNotFound(name) => write!(f, "repo \"{name}\" not found in this branch"),
        }
    }
}

impl std::error::Error for EditError {}

/// Ensure `reponame` is cloned under `branch`, checked out on `branch`'s
/// name. If already cloned (on any ref), switch it to the branch name. If
/// not yet cloned, clone at `ref_`, then try to create the branch locally,
/// falling back to a plain checkout (covers the case where an earlier
/// `edit`/build already pushed that branch name upstream).
pub fn make_repository_available(
    branch: &SystemBranch,
    cache: &RepoCache,
    resolver: &RepoAliasResolver,
    reponame: &str,
    ref_: &str,
) -> Result<PathBuf, EditError> {
    let dir = branch.dir.join(repo_subpath(resolver, reponame));
    if dir.join(".git").exists() {
        Repository::at(&dir).checkout(&branch.name)?;
        return Ok(dir);
    }

    clone_repo_into(cache, resolver, &dir, reponame, ref_)?;
    let repo = Repository::at(&dir);
    if repo.checkout_new_branch(&branch.name, "HEAD").is_err() {
        repo.checkout(&branch.name)?;
    }
    Ok(dir)
}

fn restore_original_content(clone_dir: &Path, morph_name: &str, original_ref: &str) -> Result<(), EditError> {
    let path_in_repo = format!("{morph_name}.morph");
    let content = Repository::at(clone_dir).cat_file_blob(original_ref, &path_in_repo)?;
    fs::write(clone_dir.join(&path_in_repo), content)?;
    Ok(())
}

pub fn edit(
    branch: &SystemBranch,
    cache: &RepoCache,
    resolver: &RepoAliasResolver,
    system: &str,
    stratum_name: &str,
    chunk_name: Option<&str>,
) -> Result<ChangeLog, EditError> {
    let mut changelog = ChangeLog::new();
    let root_repo = branch.root_repo()?;
    let system_dir = branch
        .find_repository(&root_repo)
        .ok_or_else(|| EditError::RepoNotFound(root_repo.clone()))?;

    let system_path = system_dir.join(format!("{system}.morph"));
    let mut system_morph = Morphology::load(&system_path)?;

    let (stratum_repo, stratum_ref, stratum_morph_name) = {
        let entry = system_morph.entry(Collection::Strata, stratum_name)?;
        (
            entry.repo().unwrap_or(&root_repo).to_string(),
            entry.ref_().unwrap_or("master").to_string(),
            entry.morph().unwrap_or(stratum_name).to_string(),
        )
    };

    let stratum_dir = make_repository_available(branch, cache, resolver, &stratum_repo, &stratum_ref)?;
    changelog.record(&stratum_repo, format!("checked out at {stratum_ref}"));

    if stratum_ref != branch.name {
        if stratum_repo == root_repo {
            restore_original_content(&system_dir, &stratum_morph_name, &stratum_ref)?;
        }
        let entry = system_morph.entry_mut(Collection::Strata, stratum_name)?;
        entry.set_ref(branch.name.clone());
        system_morph.save(&system_path)?;
        changelog.record(&root_repo, format!("{stratum_name} now tracks {}", branch.name));
    }

    if let Some(chunk_name) = chunk_name {
        let stratum_path = stratum_dir.join(format!("{stratum_morph_name}.morph"));
        let mut stratum_morph = Morphology::load(&stratum_path)?;

        let (chunk_repo, chunk_ref, chunk_morph_name) = {
            let entry = stratum_morph.entry(Collection::Chunks, chunk_name)?;
            (
                entry.repo().unwrap_or(chunk_name).to_string(),
                entry.ref_().unwrap_or("master").to_string(),
                entry.morph().map(str::to_string),
            )
        };

        make_repository_available(branch, cache, resolver, &chunk_repo, &chunk_ref)?;
        changelog.record(&chunk_repo, format!("checked out at {chunk_ref}"));

        if chunk_ref != branch.name {
            if chunk_repo == stratum_repo
                && let Some(morph_name) = &chunk_morph_name
            {
                restore_original_content(&stratum_dir, morph_name, &chunk_ref)?;
            }
            let entry = stratum_morph.entry_mut(Collection::Chunks, chunk_name)?;
            entry.set_ref(branch.name.clone());
            stratum_morph.save(&stratum_path)?;
            changelog.record(&stratum_repo, format!("{chunk_name} now tracks {}", branch.name));
        }
    }

    Ok(changelog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Workspace;
    use std::process::Command;

    #[test]
    fn edit_rewrites_stratum_ref_to_branch_name() {
        let origin = tempfile::tempdir().unwrap();
        let root_url = format!("file://{}", origin.path().display());
        let system_morph = format!(
            r#"{{
                "name": "foo",
                "kind": "system",
                "strata": [{{"name": "bar", "morph": "bar", "repo": "{root_url}", "ref": "master"}}]
            }}"#
        );
        let bar_morph = r#"{"name": "bar", "kind": "stratum", "chunks": []}"#;
        Repository::init(origin.path()).unwrap();
        let repo = Repository::at(origin.path());
        repo.set_config("user.email", "a@example.com").unwrap();
        repo.set_config("user.name", "A").unwrap();
        fs::write(origin.path().join("foo.morph"), &system_morph).unwrap();
        fs::write(origin.path().join("bar.morph"), bar_morph).unwrap();
        Command::new("git")
            .args(["add", "foo.morph", "bar.morph"])
            .current_dir(origin.path())
            .output()
            .unwrap();
        Command::new("git")
            .args(["commit", "-m", "init", "--no-gpg-sign"])
            .current_dir(origin.path())
            .output()
            .unwrap();
        Command::new("git")
            .args(["branch", "-M", "master"])
            .current_dir(origin.path())
            .output()
            .unwrap();

        let ws_dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::init(ws_dir.path()).unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let resolver = RepoAliasResolver::new(vec![]);
        let cache = RepoCache::new(cache_dir.path(), resolver.clone(), true);

        let lifecycle = crate::branch::BranchLifecycle {
            workspace: &workspace,
            cache: &cache,
            resolver: &resolver,
        };
        let branch = lifecycle.branch(&root_url, "new-feature", "master").unwrap();

        let changelog = edit(&branch, &cache, &resolver, "foo", "bar", None).unwrap();
        assert!(!changelog.is_empty());

        let clone_dir = branch.dir.join(repo_subpath(&resolver, &root_url));
        let saved = Morphology::load(&clone_dir.join("foo.morph")).unwrap();
        let entry = saved.entry(Collection::Strata, "bar").unwrap();
        assert_eq!(entry.ref_(), Some("new-feature"));
    }
}
