//! Repo alias resolver & mirror cache (component I): the thin adapter the
//! branch lifecycle and build synthesizer use to turn a logical repo name
//! into pull/push URLs and a cheap local clone.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::git::{GitError, Repository, Sha};
use crate::layout::convert_uri_to_path;
use crate::settings::RepoAlias;

#[derive(Debug)]
pub enum RepoCacheError {
    Git(GitError),
    NotCached(String),
}

impl From<GitError> for RepoCacheError {
    fn from(e: GitError) -> Self {
        RepoCacheError::Git(e)
    }
}

impl fmt::Display for RepoCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoCacheError::Git(e) => write!(f, "{e}"),
            RepoCacheError::NotCached(name) => {
                write!(f, "repo \"{name}\" is not in the repo cache")
            }
        }
    }
}

impl std::error::Error for RepoCacheError {}

fn looks_like_url(name: &str) -> bool {
    if name.contains("://") {
        return true;
    }
    // scp-like `host:path`, but not a Windows drive letter or a relative
    // alias prefix (those are handled by the alias table instead).
    if let Some((host, _)) = name.split_once(':') {
        return !host.is_empty() && !host.contains('/') && host.len() > 1;
    }
    false
}

/// Expands logical repo names to pull/push URLs via the configured alias
/// table, falling back to treating the name as a path under the first
/// configured alias (or, with no aliases at all, as a path relative to the
/// process's current directory).
#[derive(Debug, Clone)]
pub struct RepoAliasResolver {
    aliases: Vec<RepoAlias>,
}

impl RepoAliasResolver {
    pub fn new(aliases: Vec<RepoAlias>) -> Self {
        RepoAliasResolver { aliases }
    }

    fn expand(&self, pattern: &str, remainder: &str) -> String {
        pattern.replace("%s", remainder)
    }

    fn find_alias(&self, name: &str) -> Option<(&RepoAlias, &str)> {
        self.aliases.iter().find_map(|alias| {
            let prefix = format!("{}:", alias.prefix);
            name.strip_prefix(&prefix).map(|rest| (alias, rest))
        })
    }

    pub fn pull_url(&self, name: &str) -> String {
        if looks_like_url(name) {
            return name.to_string();
        }
        if let Some((alias, rest)) = self.find_alias(name) {
            return self.expand(&alias.pull, rest);
        }
        match self.aliases.first() {
            Some(default_alias) => self.expand(&default_alias.pull, name),
            None => name.to_string(),
        }
    }

    pub fn push_url(&self, name: &str) -> String {
        if looks_like_url(name) {
            return name.to_string();
        }
        if let Some((alias, rest)) = self.find_alias(name) {
            return self.expand(&alias.push, rest);
        }
        match self.aliases.first() {
            Some(default_alias) => self.expand(&default_alias.push, name),
            None => name.to_string(),
        }
    }
}

/// A local mirror-clone cache, keyed by `convert_uri_to_path(pull_url)`.
#[derive(Debug, Clone)]
pub struct RepoCache {
    root: PathBuf,
    resolver: RepoAliasResolver,
    no_git_update: bool,
}

impl RepoCache {
    pub fn new(root: impl Into<PathBuf>, resolver: RepoAliasResolver, no_git_update: bool) -> Self {
        RepoCache {
            root: root.into(),
            resolver,
            no_git_update,
        }
    }

    fn mirror_path(&self, name: &str) -> PathBuf {
        let pull_url = self.resolver.pull_url(name);
        self.root.join(convert_uri_to_path(&pull_url))
    }

    /// Look up an already-mirrored repo without cloning or updating it.
    /// Used by the petrifier, which requires the repo to already be cached.
    pub fn lookup(&self, name: &str) -> Result<CachedRepo, RepoCacheError> {
        let mirror_dir = self.mirror_path(name);
        if !mirror_dir.join("HEAD").exists() {
            return Err(RepoCacheError::NotCached(name.to_string()));
        }
        Ok(CachedRepo {
            name: name.to_string(),
            mirror_dir,
            pull_url: self.resolver.pull_url(name),
            no_git_update: self.no_git_update,
        })
    }

    /// Ensure a `--mirror` clone of `name` exists on disk and is up to date
    /// (unless `no-git-update` is set), returning a handle to it.
    pub fn cache_repo(&self, name: &str) -> Result<CachedRepo, RepoCacheError> {
        let mirror_dir = self.mirror_path(name);
        let pull_url = self.resolver.pull_url(name);

        if !mirror_dir.join("HEAD").exists() {
            if let Some(parent) = mirror_dir.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RepoCacheError::Git(GitError::ParseError(format!(
                        "creating repo cache directory {}: {e}",
                        parent.display()
                    )))
                })?;
            }
            Repository::clone_mirror(&pull_url, &mirror_dir)?;
        }

        let cached = CachedRepo {
            name: name.to_string(),
            mirror_dir,
            pull_url,
            no_git_update: self.no_git_update,
        };
        if !self.no_git_update {
            cached.update()?;
        }
        Ok(cached)
    }
}

/// A handle to one mirrored repo under the cache.
#[derive(Debug, Clone)]
pub struct CachedRepo {
    pub name: String,
    pub mirror_dir: PathBuf,
    pub pull_url: String,
    no_git_update: bool,
}

impl CachedRepo {
    pub fn update(&self) -> Result<(), GitError> {
        if self.no_git_update {
            return Ok(());
        }
        Repository::at(&self.mirror_dir).remote_update()
    }

    /// `git clone --shared <mirror> <dir>` then `git checkout <ref>`.
    pub fn checkout(&self, ref_: &str, dir: &Path) -> Result<(), GitError> {
        Repository::clone_shared(&self.mirror_dir, dir)?;
        Repository::at(dir).checkout(ref_)
    }

    /// Resolve `ref_` inside the mirror without checking anything out.
    pub fn resolve_ref(&self, ref_: &str) -> Result<Sha, GitError> {
        Repository::at(&self.mirror_dir).resolve_ref_or_fail(&self.name, ref_)
    }
}
