//! Branch lifecycle (component D): `init`, `branch`, `checkout`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::git::{GitError, Repository};
use crate::layout::{LayoutError, SystemBranch, Workspace, convert_uri_to_path};
use crate::repocache::{RepoAliasResolver, RepoCache, RepoCacheError};

#[derive(Debug)]
pub enum BranchError {
    Io(std::io::Error),
    Layout(LayoutError),
    Git(GitError),
    RepoCache(RepoCacheError),
    AlreadyExists(String),
}

impl From<std::io::Error> for BranchError {
    fn from(e: std::io::Error) -> Self {
        BranchError::Io(e)
    }
}
impl From<LayoutError> for BranchError {
    fn from(e: LayoutError) -> Self {
        BranchError::Layout(e)
    }
}
impl From<GitError> for BranchError {
    fn from(e: GitError) -> Self {
        BranchError::Git(e)
    }
}
impl From<RepoCacheError> for BranchError {
    fn from(e: RepoCacheError) -> Self {
        BranchError::RepoCache(e)
    }
}

impl fmt::Display for BranchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchError::Io(e) => write!(f, "{e}"),
            BranchError::Layout(e) => write!(f, "{e}"),
            BranchError::Git(e) => write!(f, "{e}"),
            BranchError::RepoCache(e) => write!(f, "{e}"),
            BranchError::AlreadyExists(name) => write!(f, "branch {name} already exists"),
        }
    }
}

impl std::error::Error for BranchError {}

/// Removes a half-created branch directory tree, and then any now-empty
/// ancestor directories up to (but not including) the workspace root, on
/// an abnormal exit. Call [`Self::disarm`] once the branch has been fully
/// set up.
struct RollbackGuard {
    workspace_root: PathBuf,
    branch_dir: PathBuf,
    armed: bool,
}

impl RollbackGuard {
    fn new(workspace_root: &Path, branch_dir: &Path) -> Self {
        RollbackGuard {
            workspace_root: workspace_root.to_path_buf(),
            branch_dir: branch_dir.to_path_buf(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.branch_dir) {
            log::warn!(
                "rollback: failed to remove {}: {e}",
                self.branch_dir.display()
            );
        }
        let mut dir = self.branch_dir.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            if d == self.workspace_root {
                break;
            }
            match fs::read_dir(&d) {
                Ok(mut entries) if entries.next().is_none() => {
                    if let Err(e) = fs::remove_dir(&d) {
                        log::warn!("rollback: failed to remove {}: {e}", d.display());
                        break;
                    }
                }
                _ => break,
            }
            dir = d.parent().map(Path::to_path_buf);
        }
    }
}

pub fn repo_subpath(resolver: &RepoAliasResolver, reponame: &str) -> String {
    convert_uri_to_path(&resolver.pull_url(reponame))
}

/// Bundles the components `branch`/`checkout` need: the workspace they are
/// operating in, and the cache/resolver pair that turns a logical repo
/// name into an actual clone.
pub struct BranchLifecycle<'a> {
    pub workspace: &'a Workspace,
    pub cache: &'a RepoCache,
    pub resolver: &'a RepoAliasResolver,
}

impl BranchLifecycle<'_> {
    pub fn init(dir: &Path) -> Result<Workspace, BranchError> {
        Ok(Workspace::init(dir)?)
    }

    pub fn branch(
        &self,
        root_repo: &str,
        new_name: &str,
        commit: &str,
    ) -> Result<SystemBranch, BranchError> {
        let branch = SystemBranch::create(self.workspace, new_name, root_repo)?;
        let guard = RollbackGuard::new(&self.workspace.root, &branch.dir);

        let clone_dir = branch.dir.join(repo_subpath(self.resolver, root_repo));
        self.clone_to_directory(&clone_dir, root_repo, commit)?;

        let repo = Repository::at(&clone_dir);
        if repo.resolve_ref(new_name)?.is_some() {
            return Err(BranchError::AlreadyExists(new_name.to_string()));
        }
        repo.checkout_new_branch(new_name, commit)?;

        guard.disarm();
        Ok(branch)
    }

    pub fn checkout(&self, root_repo: &str, existing_name: &str) -> Result<SystemBranch, BranchError> {
        let branch = SystemBranch::create(self.workspace, existing_name, root_repo)?;
        let guard = RollbackGuard::new(&self.workspace.root, &branch.dir);

        let clone_dir = branch.dir.join(repo_subpath(self.resolver, root_repo));
        self.clone_to_directory(&clone_dir, root_repo, existing_name)?;

        guard.disarm();
        Ok(branch)
    }

    /// Clone `reponame` at `ref_` into `dir`, tagging it with its logical
    /// name and a fresh clone UUID, and wiring `origin` (and a
    /// push-rewrite) to the real upstream rather than the local cache.
    pub fn clone_to_directory(&self, dir: &Path, reponame: &str, ref_: &str) -> Result<(), BranchError> {
        clone_repo_into(self.cache, self.resolver, dir, reponame, ref_)
    }
}

/// Shared by [`BranchLifecycle::clone_to_directory`] and the edit
/// propagator's `make_repository_available`: clone `reponame` at `ref_`
/// into `dir` and tag/rewire it as a morph-managed clone.
pub fn clone_repo_into(
    cache: &RepoCache,
    resolver: &RepoAliasResolver,
    dir: &Path,
    reponame: &str,
    ref_: &str,
) -> Result<(), BranchError> {
    let cached = cache.cache_repo(reponame)?;
    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent)?;
    }
    cached.checkout(ref_, dir)?;

    let repo = Repository::at(dir);
    repo.set_config("morph.repository", reponame)?;
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    repo.set_config("morph.uuid", &uuid)?;

    let pull = resolver.pull_url(reponame);
    let push = resolver.push_url(reponame);
    repo.set_remote_url("origin", &pull)?;
    repo.set_config(&format!("url.{push}.pushInsteadOf"), &pull)?;
    repo.remote_update()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repocache::RepoAliasResolver;
    use std::process::Command;

    fn init_origin() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        let repo = Repository::at(dir.path());
        repo.set_config("user.email", "a@example.com").unwrap();
        repo.set_config("user.name", "A").unwrap();
        fs::write(dir.path().join("f"), "x").unwrap();
        Command::new("git").args(["add", "f"]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "init", "--no-gpg-sign"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        Command::new("git")
            .args(["branch", "-M", "master"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        dir
    }

    #[test]
    fn branch_creates_clone_on_new_local_branch() {
        let origin = init_origin();
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

        let repo_url = format!("file://{}", origin.path().display());
        let branch = lifecycle.branch(&repo_url, "new-feature", "master").unwrap();
        assert_eq!(branch.name, "new-feature");
        assert_eq!(branch.root_repo().unwrap(), repo_url);
        assert_eq!(branch.uuid().unwrap().len(), 32);

        let clone_dir = branch.dir.join(repo_subpath(lifecycle.resolver, &repo_url));
        let clone_repo = Repository::at(&clone_dir);
        assert_eq!(clone_repo.get_config("morph.repository").unwrap().as_deref(), Some(repo_url.as_str()));
        let head = clone_repo.run(&["symbolic-ref", "--short", "HEAD"]).unwrap();
        assert_eq!(head, "new-feature");
    }

    #[test]
    fn branch_rolls_back_partially_created_directory_on_failure() {
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

        let bogus = ws_dir.path().join("does-not-exist-as-a-repo");
        let err = lifecycle.branch(&bogus.display().to_string(), "feature", "master");
        assert!(err.is_err());
        assert!(!workspace.root.join("feature").exists());
    }
}
