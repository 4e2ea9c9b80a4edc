//! Merge orchestrator (component F): pulls another system branch's work
//! into the current one, repo by repo, rewriting chunk/stratum refs that
//! pointed at the source branch back to the receiving branch's name.

use std::fmt;
use std::path::Path;

use crate::branch::repo_subpath;
use crate::edit::{EditError, make_repository_available};
use crate::git::{GitError, Repository};
use crate::layout::{LayoutError, SystemBranch, Workspace};
use crate::morphology::{Collection, EntryExt, Morphology, MorphologyError};
use crate::repocache::{RepoAliasResolver, RepoCache};

#[derive(Debug)]
pub enum MergeError {
    Io(std::io::Error),
    Git(GitError),
    Morphology(MorphologyError),
    Layout(LayoutError),
    Edit(EditError),
    BranchNotFound(String),
    RootMismatch { ours: String, theirs: String },
    UncommittedChanges(String),
}

impl From<std::io::Error> for MergeError {
    fn from(e: std::io::Error) -> Self {
        MergeError::Io(e)
    }
}
impl From<GitError> for MergeError {
    fn from(e: GitError) -> Self {
        MergeError::Git(e)
    }
}
impl From<MorphologyError> for MergeError {
    fn from(e: MorphologyError) -> Self {
        MergeError::Morphology(e)
    }
}
impl From<LayoutError> for MergeError {
    fn from(e: LayoutError) -> Self {
        MergeError::Layout(e)
    }
}
impl From<EditError> for MergeError {
    fn from(e: EditError) -> Self {
        MergeError::Edit(e)
    }
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::Io(e) => write!(f, "{e}"),
            MergeError::Git(e) => write!(f, "{e}"),
            MergeError::Morphology(e) => write!(f, "{e}"),
            MergeError::Layout(e) => write!(f, "{e}"),
            MergeError::Edit(e) => write!(f, "{e}"),
            MergeError::BranchNotFound(name) => write!(f, "no such system branch: {name}"),
            MergeError::RootMismatch { ours, theirs } => write!(
                f,
                "cannot merge branch rooted at {theirs} into branch rooted at {ours}"
            ),
            MergeError::UncommittedChanges(repo) => {
                write!(f, "{repo} has uncommitted changes in the source branch")
            }
        }
    }
}

impl std::error::Error for MergeError {}

fn file_url(dir: &Path) -> Result<String, MergeError> {
    let canon = dunce::canonicalize(dir)?;
    Ok(format!("file://{}", canon.display()))
}

fn require_clean(dir: &Path, label: &str) -> Result<(), MergeError> {
    if !Repository::at(dir).is_clean()? {
        return Err(MergeError::UncommittedChanges(label.to_string()));
    }
    Ok(())
}

pub fn merge(
    workspace: &Workspace,
    branch: &SystemBranch,
    cache: &RepoCache,
    resolver: &RepoAliasResolver,
    from_branch_name: &str,
) -> Result<(), MergeError> {
    let source = workspace
        .find_system_branch(from_branch_name)
        .ok_or_else(|| MergeError::BranchNotFound(from_branch_name.to_string()))?;

    let our_root = branch.root_repo()?;
    let their_root = source.root_repo()?;
    if our_root != their_root {
        return Err(MergeError::RootMismatch {
            ours: our_root,
            theirs: their_root,
        });
    }

    let source_root_dir = source
        .find_repository(&our_root)
        .ok_or_else(|| MergeError::BranchNotFound(our_root.clone()))?;
    require_clean(&source_root_dir, &our_root)?;

    let receiving_root_dir = branch
        .find_repository(&our_root)
        .ok_or_else(|| MergeError::BranchNotFound(our_root.clone()))?;

    let source_url = file_url(&source_root_dir)?;
    Repository::at(&receiving_root_dir).pull(&source_url, from_branch_name, true, true)?;

    // Re-walk every *.morph in the receiving root clone for strata that
    // still point at the branch we just pulled, and rewrite them back to
    // the receiving branch's name once their content has been merged too.
    let entries = std::fs::read_dir(&receiving_root_dir)?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("morph") {
            continue;
        }
        let mut system_morph = match Morphology::load(&path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if !matches!(system_morph.kind(), Ok(crate::morphology::Kind::System)) {
            continue;
        }

        let stratum_names: Vec<String> = system_morph
            .entries(Collection::Strata)
            .filter(|e| e.ref_() == Some(from_branch_name))
            .filter_map(|e| e.get("name").and_then(|v| v.as_str()).map(str::to_string))
            .collect();

        for name in stratum_names {
            let (stratum_repo, stratum_morph_name) = {
                let e = system_morph.entry(Collection::Strata, &name)?;
                (
                    e.repo().unwrap_or(&our_root).to_string(),
                    e.morph().unwrap_or(&name).to_string(),
                )
            };
            merge_stratum_repo(
                branch,
                &source,
                cache,
                resolver,
                from_branch_name,
                &stratum_repo,
                &stratum_morph_name,
            )?;
            let e = system_morph.entry_mut(Collection::Strata, &name)?;
            e.set_ref(branch.name.clone());
        }
        system_morph.save(&path)?;
    }

    Repository::at(&receiving_root_dir).commit_all(&format!("Merge system branch '{from_branch_name}'"))?;
    Ok(())
}

/// Merge one stratum's repo: require it clean on the source side, pull
/// (morphology-bearing, so `--no-commit`), rewrite any of its chunks still
/// pointing at `from_branch_name` back to the receiving branch, then
/// commit.
fn merge_stratum_repo(
    branch: &SystemBranch,
    source: &SystemBranch,
    cache: &RepoCache,
    resolver: &RepoAliasResolver,
    from_branch_name: &str,
    stratum_repo: &str,
    stratum_morph_name: &str,
) -> Result<(), MergeError> {
    let source_dir = source
        .dir
        .join(repo_subpath(resolver, stratum_repo));
    require_clean(&source_dir, stratum_repo)?;

    let receiving_dir = make_repository_available(branch, cache, resolver, stratum_repo, branch.name.as_str())?;
    let source_url = file_url(&source_dir)?;
    Repository::at(&receiving_dir).pull(&source_url, from_branch_name, true, true)?;

    let stratum_path = receiving_dir.join(format!("{stratum_morph_name}.morph"));
    let mut stratum_morph = Morphology::load(&stratum_path)?;
    let chunk_names: Vec<String> = stratum_morph
        .entries(Collection::Chunks)
        .filter(|e| e.ref_() == Some(from_branch_name))
        .filter_map(|e| e.get("name").and_then(|v| v.as_str()).map(str::to_string))
        .collect();

    for name in chunk_names {
        let chunk_repo = stratum_morph
            .entry(Collection::Chunks, &name)?
            .repo()
            .unwrap_or(&name)
            .to_string();
        merge_chunk_repo(branch, source, cache, resolver, from_branch_name, &chunk_repo)?;
        let e = stratum_morph.entry_mut(Collection::Chunks, &name)?;
        e.set_ref(branch.name.clone());
    }
    stratum_morph.save(&stratum_path)?;

    Repository::at(&receiving_dir).commit_all(&format!("Merge system branch '{from_branch_name}'"))?;
    Ok(())
}

/// Merge a plain chunk repo: fast-forward-disabled pull, auto-committed
/// (chunk repos carry no morphology document to post-edit).
fn merge_chunk_repo(
    branch: &SystemBranch,
    source: &SystemBranch,
    cache: &RepoCache,
    resolver: &RepoAliasResolver,
    from_branch_name: &str,
    chunk_repo: &str,
) -> Result<(), MergeError> {
    let source_dir = source.dir.join(repo_subpath(resolver, chunk_repo));
    require_clean(&source_dir, chunk_repo)?;

    let receiving_dir = make_repository_available(branch, cache, resolver, chunk_repo, branch.name.as_str())?;
    let source_url = file_url(&source_dir)?;
    Repository::at(&receiving_dir).pull(&source_url, from_branch_name, true, false)?;
    Ok(())
}
