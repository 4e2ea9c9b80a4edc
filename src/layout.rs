//! Repository layout registry (component C): discovering the workspace
//! root, the enclosing system branch, and mapping logical repo names to
//! their on-disk clones.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::git::Repository;

pub const WORKSPACE_MARKER: &str = ".morph";
pub const BRANCH_MARKER: &str = ".morph-system-branch";

#[derive(Debug)]
pub enum LayoutError {
    WorkspaceNotFound,
    BranchNotFound,
    BranchAmbiguous,
    Git(crate::git::GitError),
}

impl From<crate::git::GitError> for LayoutError {
    fn from(e: crate::git::GitError) -> Self {
        LayoutError::Git(e)
    }
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::WorkspaceNotFound => write!(f, "can't find the workspace directory"),
            LayoutError::BranchNotFound => write!(f, "can't find the system branch directory"),
            LayoutError::BranchAmbiguous => {
                write!(f, "more than one system branch below the current directory")
            }
            LayoutError::Git(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for LayoutError {}

/// A workspace: a directory tree holding one or more system branches.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
}

impl Workspace {
    /// Walk up from `start` (canonicalized) looking for a `.morph` marker
    /// directory; fails if none of the ancestors has one.
    pub fn deduce_from(start: &Path) -> Result<Workspace, LayoutError> {
        let mut dir = dunce::canonicalize(start).map_err(|_| LayoutError::WorkspaceNotFound)?;
        loop {
            if dir.join(WORKSPACE_MARKER).is_dir() {
                return Ok(Workspace { root: dir });
            }
            if !dir.pop() {
                return Err(LayoutError::WorkspaceNotFound);
            }
        }
    }

    pub fn deduce() -> Result<Workspace, LayoutError> {
        let cwd = std::env::current_dir().map_err(|_| LayoutError::WorkspaceNotFound)?;
        Self::deduce_from(&cwd)
    }

    /// Create a new workspace at `dir`. `dir` must not exist yet or must be
    /// an empty directory.
    pub fn init(dir: &Path) -> std::io::Result<Workspace> {
        if dir.exists() {
            if fs::read_dir(dir)?.next().is_some() {
                return Err(std::io::Error::other(format!(
                    "can only initialize empty directory as a workspace: {}",
                    dir.display()
                )));
            }
        } else {
            fs::create_dir_all(dir)?;
        }
        fs::create_dir(dir.join(WORKSPACE_MARKER))?;
        Ok(Workspace {
            root: dunce::canonicalize(dir)?,
        })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(WORKSPACE_MARKER).join("morph.toml")
    }

    /// Find the system branch whose `branch.name` equals `name`, searching
    /// the whole workspace (used by `merge` to locate a source branch that
    /// is not the one the CWD is inside of).
    pub fn find_system_branch(&self, name: &str) -> Option<SystemBranch> {
        walk_special_directories(&self.root, BRANCH_MARKER, None)
            .find_map(|dir| SystemBranch::at(&dir).ok().filter(|b| b.name == name))
    }
}

/// A system branch: one child directory of a workspace, holding clones of
/// every repo the developer has touched on this line of development.
#[derive(Debug, Clone)]
pub struct SystemBranch {
    pub name: String,
    pub dir: PathBuf,
}

impl SystemBranch {
    fn config_path(dir: &Path) -> PathBuf {
        dir.join(BRANCH_MARKER).join("config")
    }

    /// Load a system branch rooted at `dir` (must already have its marker
    /// and config file).
    pub fn at(dir: &Path) -> Result<SystemBranch, LayoutError> {
        let name = Self::get_config(dir, "branch.name")?;
        Ok(SystemBranch {
            name,
            dir: dir.to_path_buf(),
        })
    }

    /// Create the on-disk marker and config for a brand new system branch
    /// directory (caller is responsible for cloning the root repo into it).
    pub fn create(workspace: &Workspace, name: &str, root_repo: &str) -> std::io::Result<SystemBranch> {
        let dir = workspace.root.join(name);
        fs::create_dir_all(&dir)?;
        fs::create_dir(dir.join(BRANCH_MARKER))?;
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self::set_config(&dir, "branch.name", name).map_err(std::io::Error::other)?;
        Self::set_config(&dir, "branch.root", root_repo).map_err(std::io::Error::other)?;
        Self::set_config(&dir, "branch.uuid", &uuid).map_err(std::io::Error::other)?;
        Ok(SystemBranch {
            name: name.to_string(),
            dir,
        })
    }

    pub fn get_config(dir: &Path, key: &str) -> Result<String, LayoutError> {
        let file = Self::config_path(dir);
        let repo = Repository::at(dir);
        Ok(repo.get_config_file(&file, key)?.trim().to_string())
    }

    pub fn set_config(dir: &Path, key: &str, value: &str) -> Result<(), LayoutError> {
        let file = Self::config_path(dir);
        let repo = Repository::at(dir);
        repo.set_config_file(&file, key, value)?;
        Ok(())
    }

    pub fn root_repo(&self) -> Result<String, LayoutError> {
        Self::get_config(&self.dir, "branch.root")
    }

    pub fn uuid(&self) -> Result<String, LayoutError> {
        Self::get_config(&self.dir, "branch.uuid")
    }

    /// Locate the enclosing system branch from `start`: if `start` itself is
    /// inside a branch, walk up to its marker; otherwise (inside the
    /// workspace, but above any branch) adopt the single unambiguous branch
    /// directory strictly below `start`, if there is exactly one.
    pub fn deduce_from(workspace: &Workspace, start: &Path) -> Result<SystemBranch, LayoutError> {
        let mut dir = dunce::canonicalize(start).map_err(|_| LayoutError::BranchNotFound)?;
        while dir != workspace.root {
            if dir.join(BRANCH_MARKER).is_dir() {
                return SystemBranch::at(&dir);
            }
            if !dir.pop() {
                break;
            }
        }

        let mut candidates = walk_special_directories(&dir, BRANCH_MARKER, Some(1));
        let Some(first) = candidates.next() else {
            return Err(LayoutError::BranchNotFound);
        };
        if candidates.next().is_some() {
            return Err(LayoutError::BranchAmbiguous);
        }
        SystemBranch::at(&first)
    }

    pub fn deduce(workspace: &Workspace) -> Result<SystemBranch, LayoutError> {
        let cwd = std::env::current_dir().map_err(|_| LayoutError::BranchNotFound)?;
        Self::deduce_from(workspace, &cwd)
    }

    /// Find the clone whose `morph.repository` config equals `logical_name`,
    /// searching directories under this branch that contain a `.git`.
    pub fn find_repository(&self, logical_name: &str) -> Option<PathBuf> {
        walk_special_directories(&self.dir, ".git", None).find(|dir| {
            let repo = Repository::at(dir);
            repo.get_config("morph.repository").ok().flatten().as_deref() == Some(logical_name)
        })
    }
}

/// Bounded breadth-ish-first walk over directories under `root` looking for
/// ones containing `special_subdir`.
///
/// Mirrors `os.walk(followlinks=True)` with a visited-set symlink guard:
/// hidden directories are never descended into, and once a directory has
/// more than `max_subdirs` candidate children (when `max_subdirs` is
/// `Some`), the walk stops descending further from there.
pub fn walk_special_directories(
    root: &Path,
    special_subdir: &str,
    max_subdirs: Option<usize>,
) -> impl Iterator<Item = PathBuf> {
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
    let mut found: Vec<PathBuf> = Vec::new();

    while let Some(dir) = stack.pop() {
        let canon = dunce::canonicalize(&dir).unwrap_or_else(|_| dir.clone());
        if !visited.insert(canon) {
            continue;
        }

        let Ok(read) = fs::read_dir(&dir) else {
            continue;
        };

        let mut subdirs = Vec::new();
        let mut has_special = false;
        for entry in read.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if name == special_subdir {
                has_special = true;
                continue;
            }
            if name.starts_with('.') {
                continue;
            }
            subdirs.push(path);
        }

        if has_special {
            found.push(dir.clone());
        }

        if let Some(max) = max_subdirs
            && subdirs.len() > max
        {
            continue;
        }
        stack.extend(subdirs);
    }

    found.into_iter()
}

/// Convert a repo URI into a deterministic, collision-resistant path
/// fragment: `scheme://host/path.git` -> `host/path`; a bare absolute local
/// path (`/srv/repos/myrepo`) has its leading slash stripped the same way;
/// a true relative path or scp-like alias (`baserock:morphs`) passes
/// through unchanged.
pub fn convert_uri_to_path(uri: &str) -> String {
    if let Some((scheme_rest, _)) = uri.split_once("://") {
        let _ = scheme_rest;
    } else if uri.starts_with('.') || (!uri.contains(':') && !uri.starts_with('/')) {
        // True relative path (no scheme, no leading slash): pass through unchanged.
        return uri.to_string();
    }

    let without_scheme = uri.split_once("://").map(|(_, rest)| rest).unwrap_or(uri);
    // `without_scheme` is now `host/path`, a bare absolute path with no
    // host (`/srv/repos/myrepo`), or, for scp-like `alias:repo` (no
    // `://`), `alias:repo` — only those reach this branch, since bare
    // relative paths/aliases without a leading slash are returned above.
    let without_scheme = without_scheme.strip_suffix(".git").unwrap_or(without_scheme);
    without_scheme.trim_start_matches('/').to_string()
}
