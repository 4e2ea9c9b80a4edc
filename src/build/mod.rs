//! Build-ref synthesizer (component G): the core of this crate.
//!
//! Turns the working trees of every repo participating in a system into a
//! set of ephemeral, content-addressed commits ("build refs"), with every
//! cross-repo morphology reference rewritten to point at the matching
//! build ref, then hands the result off to an injected [`BuildEngine`].
//! The user's real working tree and index are never touched: everything
//! is staged through an isolated index at `.git/morph-index`.

use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use tempfile::NamedTempFile;

use crate::git::{Committer, GitError, Repository, Sha};
use crate::layout::SystemBranch;
use crate::morphology::{Collection, EntryExt, Morphology, MorphologyError};

#[derive(Debug)]
pub enum BuildError {
    Io(std::io::Error),
    Git(GitError),
    Morphology(MorphologyError),
    RepoNotFound(String),
    MissingRepoUuid(String),
    Engine(String),
}

impl From<std::io::Error> for BuildError {
    fn from(e: std::io::Error) -> Self {
        BuildError::Io(e)
    }
}
impl From<GitError> for BuildError {
    fn from(e: GitError) -> Self {
        BuildError::Git(e)
    }
}
impl From<MorphologyError> for BuildError {
    fn from(e: MorphologyError) -> Self {
        BuildError::Morphology(e)
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Io(e) => write!(f, "{e}"),
            BuildError::Git(e) => write!(f, "{e}"),
            BuildError::Morphology(e) => write!(f, "{e}"),
            BuildError::RepoNotFound(name) => write!(f, "repo \"{name}\" not found in this branch"),
            BuildError::MissingRepoUuid(name) => {
                write!(f, "repo \"{name}\" has no morph.uuid set; was it cloned by morph?")
            }
            BuildError::Engine(msg) => write!(f, "build failed: {msg}"),
        }
    }
}

impl std::error::Error for BuildError {}

/// One repo's contribution to a build plan: its clone directory, and the
/// basenames (without `.morph`) of every system/stratum/chunk morphology
/// in it that is part of this build.
#[derive(Debug, Clone, Default)]
pub struct PlanRepo {
    pub clone_dir: PathBuf,
    pub systems: Vec<String>,
    pub strata: Vec<String>,
    pub chunks: Vec<String>,
}

/// The set of repos participating in one build, in first-touched order.
#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    pub repos: IndexMap<String, PlanRepo>,
}

impl BuildPlan {
    fn entry(&mut self, name: &str, clone_dir: &std::path::Path) -> &mut PlanRepo {
        self.repos.entry(name.to_string()).or_insert_with(|| PlanRepo {
            clone_dir: clone_dir.to_path_buf(),
            ..Default::default()
        })
    }
}

/// Walk the system/stratum/chunk morphologies reachable from `system_name`
/// through entries whose `ref` equals the current branch name, and record
/// every repo touched plus which of its morphologies are in scope.
pub fn plan_build(branch: &SystemBranch, system_name: &str) -> Result<BuildPlan, BuildError> {
    let root_repo = branch.root_repo().map_err(|e| BuildError::RepoNotFound(e.to_string()))?;
    let root_dir = branch
        .find_repository(&root_repo)
        .ok_or_else(|| BuildError::RepoNotFound(root_repo.clone()))?;

    let mut plan = BuildPlan::default();
    plan.entry(&root_repo, &root_dir).systems.push(system_name.to_string());

    let system_morph = Morphology::load(&root_dir.join(format!("{system_name}.morph")))?;
    let strata: Vec<(String, String)> = system_morph
        .entries(Collection::Strata)
        .filter(|e| e.ref_() == Some(branch.name.as_str()))
        .map(|e| {
            (
                e.repo().unwrap_or(&root_repo).to_string(),
                e.morph()
                    .or_else(|| e.get("name").and_then(|v| v.as_str()))
                    .unwrap_or_default()
                    .to_string(),
            )
        })
        .collect();

    for (stratum_repo, stratum_morph_name) in strata {
        let stratum_dir = branch
            .find_repository(&stratum_repo)
            .ok_or_else(|| BuildError::RepoNotFound(stratum_repo.clone()))?;
        plan.entry(&stratum_repo, &stratum_dir).strata.push(stratum_morph_name.clone());

        let stratum_morph = Morphology::load(&stratum_dir.join(format!("{stratum_morph_name}.morph")))?;
        let chunks: Vec<(String, String)> = stratum_morph
            .entries(Collection::Chunks)
            .filter(|e| e.ref_() == Some(branch.name.as_str()))
            .map(|e| {
                (
                    e.repo()
                        .or_else(|| e.get("name").and_then(|v| v.as_str()))
                        .unwrap_or_default()
                        .to_string(),
                    e.morph()
                        .or_else(|| e.get("name").and_then(|v| v.as_str()))
                        .unwrap_or_default()
                        .to_string(),
                )
            })
            .collect();

        for (chunk_repo, chunk_morph_name) in chunks {
            let chunk_dir = branch
                .find_repository(&chunk_repo)
                .ok_or_else(|| BuildError::RepoNotFound(chunk_repo.clone()))?;
            plan.entry(&chunk_repo, &chunk_dir).chunks.push(chunk_morph_name);
        }
    }

    Ok(plan)
}

/// `<prefix>/<branch-uuid>/<repo-uuid>`, deterministic given the same
/// branch and the same clone's `morph.uuid`.
pub fn build_ref_names(
    plan: &BuildPlan,
    prefix: &str,
    branch_uuid: &str,
) -> Result<IndexMap<String, String>, BuildError> {
    let mut names = IndexMap::new();
    for (reponame, plan_repo) in &plan.repos {
        let repo_uuid = Repository::at(&plan_repo.clone_dir)
            .get_config("morph.uuid")?
            .ok_or_else(|| BuildError::MissingRepoUuid(reponame.clone()))?;
        names.insert(reponame.clone(), format!("{prefix}/{branch_uuid}/{repo_uuid}"));
    }
    Ok(names)
}

fn rewrite_refs_for_build(
    morph: &mut Morphology,
    collection: Collection,
    plan: &BuildPlan,
    build_refs: &IndexMap<String, String>,
) {
    for entry in morph.entries_mut(collection) {
        let name_field = entry.get("name").and_then(|v| v.as_str()).map(str::to_string);
        let Some(repo) = entry.repo().map(str::to_string).or_else(|| name_field.clone()) else {
            continue;
        };
        let Some(morph_name) = entry.morph().map(str::to_string).or(name_field) else {
            continue;
        };
        let Some(plan_repo) = plan.repos.get(&repo) else {
            continue;
        };
        let in_scope = match collection {
            Collection::Strata => plan_repo.strata.contains(&morph_name),
            Collection::Chunks => plan_repo.chunks.contains(&morph_name),
        };
        if in_scope
            && let Some(build_ref) = build_refs.get(&repo)
        {
            entry.set_ref(build_ref.clone());
        }
    }
}

/// Commit one plan repo's working tree into an ephemeral build-ref commit
/// via an isolated index, leaving the real working tree and index intact.
fn commit_ephemeral(
    reponame: &str,
    repo_dir: &std::path::Path,
    branch_name: &str,
    plan: &BuildPlan,
    plan_repo: &PlanRepo,
    build_refs: &IndexMap<String, String>,
    own_build_ref: &str,
    build_uuid: &str,
) -> Result<Sha, BuildError> {
    let repo = Repository::at(repo_dir);
    let index_file = repo.isolated_index_path()?;

    let parent = match repo.resolve_ref(own_build_ref)? {
        Some(sha) => sha,
        None => repo.resolve_ref_or_fail(reponame, branch_name)?,
    };

    repo.read_tree(&index_file, &parent)?;
    let changed = repo.status_porcelain()?;
    repo.add_paths(&index_file, &changed)?;

    let mut morph_names: Vec<(String, Collection)> = plan_repo
        .systems
        .iter()
        .cloned()
        .map(|n| (n, Collection::Strata))
        .collect();
    morph_names.extend(plan_repo.strata.iter().cloned().map(|n| (n, Collection::Chunks)));

    for (name, collection) in morph_names {
        let path = repo_dir.join(format!("{name}.morph"));
        let mut morph = Morphology::load(&path)?;
        rewrite_refs_for_build(&mut morph, collection, plan, build_refs);

        let mut tmp = NamedTempFile::new_in(repo_dir)?;
        {
            use std::io::Write;
            let bytes = morph.to_canonical_bytes()?;
            tmp.write_all(&bytes)?;
        }
        let tmp_path = tmp.into_temp_path();
        let sha = repo.hash_object_write(&index_file, &tmp_path)?;
        repo.update_index_cacheinfo(&index_file, &sha, &format!("{name}.morph"))?;
    }

    let tree = repo.write_tree(&index_file)?;
    let committer = Committer::for_build(&repo);
    let message = format!("Morph build {build_uuid} of branch '{branch_name}'");
    let commit = repo.commit_tree(&index_file, &tree, &parent, &message, &committer)?;
    repo.update_ref(&format!("refs/heads/{own_build_ref}"), &commit, &message)?;
    Ok(commit)
}

/// Request handed to the external build engine: the branch-root clone, the
/// build ref that was pushed for it, and the system morphology to build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub branch_root: PathBuf,
    pub build_ref: String,
    pub system_morph: String,
}

/// Seam for the actual build engine, out of scope for this crate.
pub trait BuildEngine {
    fn build(&self, request: &BuildRequest) -> Result<(), Box<dyn std::error::Error>>;
}

/// Plan, synthesize ephemeral build refs, push them, hand off to `engine`,
/// then unconditionally clean up the pushed refs regardless of whether the
/// build succeeded. A cleanup failure is logged but never replaces a build
/// error.
pub fn build(
    branch: &SystemBranch,
    system_name: &str,
    build_ref_prefix: &str,
    engine: &dyn BuildEngine,
) -> Result<(), BuildError> {
    let plan = plan_build(branch, system_name)?;
    let branch_uuid = branch.uuid().map_err(|e| BuildError::RepoNotFound(e.to_string()))?;
    let build_refs = build_ref_names(&plan, build_ref_prefix, &branch_uuid)?;
    let build_uuid = uuid::Uuid::new_v4().simple().to_string();

    for (reponame, plan_repo) in &plan.repos {
        let own_build_ref = &build_refs[reponame];
        commit_ephemeral(
            reponame,
            &plan_repo.clone_dir,
            &branch.name,
            &plan,
            plan_repo,
            &build_refs,
            own_build_ref,
            &build_uuid,
        )?;
        Repository::at(&plan_repo.clone_dir).push("origin", own_build_ref)?;
    }

    let root_repo = branch.root_repo().map_err(|e| BuildError::RepoNotFound(e.to_string()))?;
    let root_plan = &plan.repos[&root_repo];
    let request = BuildRequest {
        branch_root: root_plan.clone_dir.clone(),
        build_ref: build_refs[&root_repo].clone(),
        system_morph: format!("{system_name}.morph"),
    };

    let build_result = engine.build(&request).map_err(|e| BuildError::Engine(e.to_string()));

    for (reponame, plan_repo) in &plan.repos {
        let own_build_ref = &build_refs[reponame];
        if let Err(e) = Repository::at(&plan_repo.clone_dir).delete_remote_ref("origin", &format!("refs/heads/{own_build_ref}")) {
            log::warn!("cleanup: failed to delete build ref {own_build_ref} for {reponame}: {e}");
        }
    }

    build_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_ref_names_are_deterministic_given_same_uuids() {
        let mut plan = BuildPlan::default();
        let dir = tempfile::tempdir().unwrap();
        crate::git::Repository::init(dir.path()).unwrap();
        let repo = crate::git::Repository::at(dir.path());
        repo.set_config("morph.uuid", "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").unwrap();
        plan.entry("repo-a", dir.path());

        let names_first = build_ref_names(&plan, "baserock/builds", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let names_second = build_ref_names(&plan, "baserock/builds", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        assert_eq!(names_first, names_second);
        assert_eq!(
            names_first["repo-a"],
            "baserock/builds/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa/bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
        );
    }
}
