//! Petrifier (component H): pin every chunk ref in a stratum to a full
//! commit SHA, in place.

use std::fmt;
use std::path::Path;

use crate::morphology::{Collection, EntryExt, Kind, Morphology, MorphologyError};
use crate::repocache::{RepoCache, RepoCacheError};

#[derive(Debug)]
pub enum PetrifyError {
    Morphology(MorphologyError),
    RepoCache(RepoCacheError),
    NotAStratum,
}

impl From<MorphologyError> for PetrifyError {
    fn from(e: MorphologyError) -> Self {
        PetrifyError::Morphology(e)
    }
}
impl From<RepoCacheError> for PetrifyError {
    fn from(e: RepoCacheError) -> Self {
        PetrifyError::RepoCache(e)
    }
}

impl fmt::Display for PetrifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PetrifyError::Morphology(e) => write!(f, "{e}"),
            PetrifyError::RepoCache(e) => write!(f, "{e}"),
            PetrifyError::NotAStratum => write!(f, "petrify only operates on stratum morphologies"),
        }
    }
}

impl std::error::Error for PetrifyError {}

/// Resolve every chunk's `ref` to a commit SHA and save the morphology at
/// `path` in place. Running this twice on the same file is a no-op: a
/// SHA resolves to itself.
pub fn petrify(cache: &RepoCache, path: &Path) -> Result<(), PetrifyError> {
    let mut morph = Morphology::load(path)?;
    if !matches!(morph.kind(), Ok(Kind::Stratum)) {
        return Err(PetrifyError::NotAStratum);
    }

    for entry in morph.entries_mut(Collection::Chunks) {
        let Some(repo) = entry.repo().map(str::to_string) else {
            continue;
        };
        let Some(ref_) = entry.ref_().map(str::to_string) else {
            continue;
        };
        let cached = cache.lookup(&repo)?;
        let sha = cached.resolve_ref(&ref_)?;
        entry.set_ref(sha);
    }

    morph.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repocache::RepoAliasResolver;
    use std::process::Command;

    fn init_origin() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        crate::git::Repository::init(dir.path()).unwrap();
        let repo = crate::git::Repository::at(dir.path());
        repo.set_config("user.email", "a@example.com").unwrap();
        repo.set_config("user.name", "A").unwrap();
        std::fs::write(dir.path().join("f"), "x").unwrap();
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
    fn petrify_is_idempotent() {
        let origin = init_origin();
        let repo_url = format!("file://{}", origin.path().display());

        let cache_dir = tempfile::tempdir().unwrap();
        let resolver = RepoAliasResolver::new(vec![]);
        let cache = RepoCache::new(cache_dir.path(), resolver, true);
        cache.cache_repo(&repo_url).unwrap();

        let stratum = format!(
            r#"{{"name": "bar", "kind": "stratum", "chunks": [{{"name": "f", "repo": "{repo_url}", "ref": "master"}}]}}"#
        );
        let morph_dir = tempfile::tempdir().unwrap();
        let path = morph_dir.path().join("bar.morph");
        std::fs::write(&path, &stratum).unwrap();

        petrify(&cache, &path).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        petrify(&cache, &path).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);

        let morph = Morphology::load(&path).unwrap();
        let entry = morph.entry(Collection::Chunks, "f").unwrap();
        assert_eq!(entry.ref_().unwrap().len(), 40);
    }

    #[test]
    fn petrify_refuses_non_stratum() {
        let cache_dir = tempfile::tempdir().unwrap();
        let resolver = RepoAliasResolver::new(vec![]);
        let cache = RepoCache::new(cache_dir.path(), resolver, true);

        let morph_dir = tempfile::tempdir().unwrap();
        let path = morph_dir.path().join("foo.morph");
        std::fs::write(&path, r#"{"name": "foo", "kind": "system", "strata": []}"#).unwrap();

        let err = petrify(&cache, &path).unwrap_err();
        assert!(matches!(err, PetrifyError::NotAStratum));
    }
}
