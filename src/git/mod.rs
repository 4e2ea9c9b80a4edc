//! Thin wrapper over the external `git` binary.
//!
//! Morph never links against libgit2: every operation is a `git` subprocess
//! whose stdout/stderr is parsed. The one discipline this module enforces is
//! that any time it synthesizes a commit without the user asking for one (the
//! build-ref synthesizer in [`crate::build`]), it does so through an
//! *isolated index* file so the user's working tree and ordinary index are
//! never touched.

mod error;

pub use error::GitError;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A 40-character hex commit id.
pub type Sha = String;

/// A git repository rooted at a specific working directory.
#[derive(Debug, Clone)]
pub struct Repository {
    path: PathBuf,
}

impl Repository {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a `git` subcommand, returning trimmed stdout on success.
    pub fn run(&self, args: &[&str]) -> Result<String, GitError> {
        self.run_with_env(args, &[])
    }

    /// Run a `git` subcommand with extra environment variables set (used for
    /// isolated-index plumbing and committer identity overrides).
    pub fn run_with_env(&self, args: &[&str], env: &[(&str, &str)]) -> Result<String, GitError> {
        let command_str = format!("git {}", args.join(" "));

        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in env {
            cmd.env(k, v);
        }

        let output = cmd
            .output()
            .map_err(|e| GitError::SpawnFailed {
                command: command_str.clone(),
                error: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(GitError::command_failed(
                command_str,
                String::from_utf8_lossy(&output.stderr),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    /// Run a `git` subcommand, returning whether it exited zero, without
    /// surfacing stderr as an error (used for existence checks).
    pub fn run_ok(&self, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Ref resolution (component A)
    // ------------------------------------------------------------------

    /// Resolve `ref_` to a commit SHA.
    ///
    /// Tries `git show-ref` first (returning the SHA of the first matching
    /// line); if that fails and `ref_` looks like a 40-hex string, verifies
    /// it is a live object via `git rev-list --no-walk` and returns it
    /// as-is. Returns `None` only when neither approach resolves anything;
    /// a syntactically SHA-like but dangling ref is `None`, not an error.
    pub fn resolve_ref(&self, ref_: &str) -> Result<Option<Sha>, GitError> {
        if let Ok(out) = self.run(&["show-ref", ref_])
            && let Some(line) = out.lines().next()
            && let Some((sha, _name)) = line.split_once(' ')
        {
            return Ok(Some(sha.to_string()));
        }

        if is_hex_sha(ref_) && self.run_ok(&["rev-list", "--no-walk", ref_]) {
            return Ok(Some(ref_.to_string()));
        }

        Ok(None)
    }

    /// Resolve `ref_`, failing with [`GitError::BadRef`] rather than
    /// returning `None`. Used by the petrifier, where an unresolvable ref is
    /// always a hard error.
    pub fn resolve_ref_or_fail(&self, repo_name: &str, ref_: &str) -> Result<Sha, GitError> {
        self.resolve_ref(ref_)?.ok_or_else(|| GitError::BadRef {
            repo: repo_name.to_string(),
            ref_: ref_.to_string(),
        })
    }

    // ------------------------------------------------------------------
    // Isolated-index plumbing (component A, used by the build synthesizer)
    // ------------------------------------------------------------------

    /// Path to this repo's isolated index file, distinct from `.git/index`.
    pub fn isolated_index_path(&self) -> Result<PathBuf, GitError> {
        let git_dir = self.run(&["rev-parse", "--git-dir"])?;
        let git_dir = self.path.join(git_dir);
        Ok(git_dir.join("morph-index"))
    }

    fn isolated_env(&self, index_file: &Path) -> Vec<(String, String)> {
        vec![(
            "GIT_INDEX_FILE".to_string(),
            index_file.display().to_string(),
        )]
    }

    pub fn read_tree(&self, index_file: &Path, tree_ish: &str) -> Result<(), GitError> {
        let env = self.isolated_env(index_file);
        let env_refs: Vec<(&str, &str)> = env.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        self.run_with_env(&["read-tree", tree_ish], &env_refs)?;
        Ok(())
    }

    pub fn add_paths(&self, index_file: &Path, paths: &[String]) -> Result<(), GitError> {
        if paths.is_empty() {
            return Ok(());
        }
        let env = self.isolated_env(index_file);
        let env_refs: Vec<(&str, &str)> = env.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let mut args: Vec<&str> = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_with_env(&args, &env_refs)?;
        Ok(())
    }

    pub fn hash_object_write(&self, index_file: &Path, path: &Path) -> Result<Sha, GitError> {
        let env = self.isolated_env(index_file);
        let env_refs: Vec<(&str, &str)> = env.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        self.run_with_env(
            &["hash-object", "-t", "blob", "-w", &path.display().to_string()],
            &env_refs,
        )
    }

    pub fn update_index_cacheinfo(
        &self,
        index_file: &Path,
        sha: &str,
        path_in_tree: &str,
    ) -> Result<(), GitError> {
        let env = self.isolated_env(index_file);
        let env_refs: Vec<(&str, &str)> = env.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        self.run_with_env(
            &["update-index", "--cacheinfo", "100644", sha, path_in_tree],
            &env_refs,
        )?;
        Ok(())
    }

    pub fn write_tree(&self, index_file: &Path) -> Result<Sha, GitError> {
        let env = self.isolated_env(index_file);
        let env_refs: Vec<(&str, &str)> = env.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        self.run_with_env(&["write-tree"], &env_refs)
    }

    pub fn commit_tree(
        &self,
        index_file: &Path,
        tree: &str,
        parent: &str,
        message: &str,
        committer: &Committer,
    ) -> Result<Sha, GitError> {
        let mut env = self.isolated_env(index_file);
        env.push(("GIT_COMMITTER_NAME".to_string(), committer.name.clone()));
        env.push(("GIT_COMMITTER_EMAIL".to_string(), committer.email.clone()));
        let env_refs: Vec<(&str, &str)> = env.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        self.run_with_env(
            &["commit-tree", tree, "-p", parent, "-m", message],
            &env_refs,
        )
    }

    pub fn update_ref(&self, refname: &str, sha: &str, message: &str) -> Result<(), GitError> {
        self.run(&["update-ref", "-m", message, refname, sha])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Porcelain convenience wrappers
    // ------------------------------------------------------------------

    /// Changed, tracked paths (`git status --porcelain`, excluding `??`).
    pub fn status_porcelain(&self) -> Result<Vec<String>, GitError> {
        let out = self.run(&["status", "--porcelain"])?;
        let mut changed = Vec::new();
        for line in out.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let (xy, rest) = line.split_at(2);
            if xy == "??" {
                continue;
            }
            let path = rest.trim_start();
            // Renames are "old -> new"; we only care about the new path.
            let path = path.split(" -> ").next_back().unwrap_or(path);
            changed.push(path.to_string());
        }
        Ok(changed)
    }

    pub fn is_clean(&self) -> Result<bool, GitError> {
        Ok(self.status_porcelain()?.is_empty())
    }

    pub fn checkout(&self, ref_: &str) -> Result<(), GitError> {
        self.run(&["checkout", ref_])?;
        Ok(())
    }

    pub fn checkout_new_branch(&self, branch: &str, start_point: &str) -> Result<(), GitError> {
        self.run(&["checkout", "-b", branch, start_point])?;
        Ok(())
    }

    pub fn commit_all(&self, message: &str) -> Result<(), GitError> {
        self.run(&["commit", "--all", &format!("--message={message}")])?;
        Ok(())
    }

    pub fn pull(&self, url: &str, branch: &str, no_ff: bool, no_commit: bool) -> Result<(), GitError> {
        let mut args = vec!["pull"];
        if no_ff {
            args.push("--no-ff");
        }
        if no_commit {
            args.push("--no-commit");
        }
        args.push(url);
        args.push(branch);
        self.run(&args)?;
        Ok(())
    }

    pub fn push(&self, remote: &str, refspec: &str) -> Result<(), GitError> {
        self.run(&["push", remote, refspec])?;
        Ok(())
    }

    pub fn delete_remote_ref(&self, remote: &str, refname: &str) -> Result<(), GitError> {
        self.run(&["push", remote, &format!(":{refname}")])?;
        Ok(())
    }

    pub fn remote_add(&self, name: &str, url: &str) -> Result<(), GitError> {
        self.run(&["remote", "add", "-f", name, url])?;
        Ok(())
    }

    pub fn set_remote_url(&self, name: &str, url: &str) -> Result<(), GitError> {
        if self.run_ok(&["remote", "get-url", name]) {
            self.run(&["remote", "set-url", name, url])?;
        } else {
            self.run(&["remote", "add", name, url])?;
        }
        Ok(())
    }

    pub fn remote_update(&self) -> Result<(), GitError> {
        self.run(&["remote", "update"])?;
        Ok(())
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<(), GitError> {
        self.run(&["config", key, value])?;
        Ok(())
    }

    pub fn get_config(&self, key: &str) -> Result<Option<String>, GitError> {
        match self.run(&["config", key]) {
            Ok(v) if !v.is_empty() => Ok(Some(v)),
            Ok(_) => Ok(None),
            Err(_) => Ok(None),
        }
    }

    pub fn set_config_file(&self, file: &Path, key: &str, value: &str) -> Result<(), GitError> {
        self.run(&["config", "-f", &file.display().to_string(), key, value])?;
        Ok(())
    }

    pub fn get_config_file(&self, file: &Path, key: &str) -> Result<String, GitError> {
        self.run(&["config", "-f", &file.display().to_string(), key])
    }

    /// `git cat-file blob <ref>:<path>`.
    pub fn cat_file_blob(&self, ref_: &str, path: &str) -> Result<String, GitError> {
        self.run(&["cat-file", "blob", &format!("{ref_}:{path}")])
    }

    /// `git ls-tree <ref> <path>`, returning the object's SHA (4th whitespace
    /// field), used to resolve a submodule's pinned commit.
    pub fn ls_tree_entry(&self, ref_: &str, path: &str) -> Result<Option<Sha>, GitError> {
        let out = self.run(&["ls-tree", ref_, path])?;
        let Some(line) = out.lines().next() else {
            return Ok(None);
        };
        let sha = line.split_whitespace().nth(2);
        Ok(sha.map(str::to_string))
    }

    pub fn clone_mirror(url: &str, dest: &Path) -> Result<(), GitError> {
        run_bare(&["clone", "--mirror", url, &dest.display().to_string()])
    }

    pub fn clone_shared(src: &Path, dest: &Path) -> Result<(), GitError> {
        run_bare(&[
            "clone",
            "--shared",
            &src.display().to_string(),
            &dest.display().to_string(),
        ])
    }

    pub fn init(dest: &Path) -> Result<(), GitError> {
        run_bare(&["init", &dest.display().to_string()])
    }
}

/// Identity used when committing ephemeral build-ref commits: `Morph (on
/// behalf of <user.name>) <LOGNAME@hostname>`.
#[derive(Debug, Clone)]
pub struct Committer {
    pub name: String,
    pub email: String,
}

impl Committer {
    pub fn for_build(repo: &Repository) -> Self {
        let user_name = repo
            .get_config("user.name")
            .ok()
            .flatten()
            .unwrap_or_else(|| "unknown".to_string());
        let name = format!("Morph (on behalf of {user_name})");
        let logname = std::env::var("LOGNAME")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "morph".to_string());
        let hostname = hostname();
        let email = format!("{logname}@{hostname}");
        Committer { name, email }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::process::Command::new("hostname")
                .output()
                .ok()
                .and_then(|o| String::from_utf8(o.stdout).ok())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

fn is_hex_sha(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Run a `git` subcommand with the current directory as cwd (used for
/// commands like `clone`/`init` that don't yet have a repo to root them at).
fn run_bare(args: &[&str]) -> Result<(), GitError> {
    let command_str = format!("git {}", args.join(" "));
    let output = Command::new("git")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| GitError::SpawnFailed {
            command: command_str.clone(),
            error: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(GitError::command_failed(
            command_str,
            String::from_utf8_lossy(&output.stderr),
        ));
    }
    Ok(())
}

/// A parsed `.gitmodules` submodule entry with its pinned commit resolved
/// from the parent tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submodule {
    pub name: String,
    pub url: String,
    pub path: String,
    pub commit: Sha,
}

/// Errors specific to `.gitmodules` parsing (kept distinct from [`GitError`]
/// because they describe a malformed *document*, not a failed command).
#[derive(Debug)]
pub enum SubmoduleError {
    Missing,
    MalformedSection(String),
    MissingCommit(String),
}

impl fmt::Display for SubmoduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmoduleError::Missing => write!(f, "no .gitmodules file"),
            SubmoduleError::MalformedSection(s) => {
                write!(f, "misformatted .gitmodules section title: [{s}]")
            }
            SubmoduleError::MissingCommit(name) => {
                write!(f, "no commit object found for submodule \"{name}\"")
            }
        }
    }
}

impl std::error::Error for SubmoduleError {}

use std::fmt;

/// Parse the `.gitmodules` blob at `ref_` plus the parent tree entries to
/// resolve each submodule's pinned commit.
///
/// INI indentation confuses a strict parser, so every line is stripped of
/// leading whitespace before being handed to the (permissive) key=value
/// section parser; section headers must match `submodule "<name>"` exactly.
pub fn load_submodules(repo: &Repository, ref_: &str) -> Result<Vec<Submodule>, SubmoduleError> {
    let content = repo
        .cat_file_blob(ref_, ".gitmodules")
        .map_err(|_| SubmoduleError::Missing)?;

    let sections = parse_ini_sections(&content);
    let mut submodules = Vec::new();
    for (header, fields) in sections {
        let name = header
            .strip_prefix("submodule \"")
            .and_then(|s| s.strip_suffix('"'))
            .ok_or_else(|| SubmoduleError::MalformedSection(header.clone()))?;

        let url = fields.get("url").cloned().unwrap_or_default();
        let path = fields.get("path").cloned().unwrap_or_default();

        let commit = repo
            .ls_tree_entry(ref_, &path)
            .ok()
            .flatten()
            .filter(|sha| sha.len() == 40)
            .ok_or_else(|| SubmoduleError::MissingCommit(name.to_string()))?;

        submodules.push(Submodule {
            name: name.to_string(),
            url,
            path,
            commit,
        });
    }
    Ok(submodules)
}

fn parse_ini_sections(content: &str) -> Vec<(String, HashMap<String, String>)> {
    let mut sections = Vec::new();
    let mut current: Option<(String, HashMap<String, String>)> = None;

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if let Some(done) = current.take() {
                sections.push(done);
            }
            current = Some((header.to_string(), HashMap::new()));
        } else if let Some((_, fields)) = current.as_mut()
            && let Some((k, v)) = line.split_once('=')
        {
            fields.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    if let Some(done) = current.take() {
        sections.push(done);
    }
    sections
}
