//! `morph`: CLI dispatch, logging, and styled output (component K).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use morph::branch::BranchLifecycle;
use morph::build::{BuildEngine, BuildRequest};
use morph::layout::{SystemBranch, Workspace};
use morph::repocache::{RepoAliasResolver, RepoCache};
use morph::settings::{CliOverrides, EnvOverrides, Settings};
use morph::styling;

#[derive(Parser)]
#[command(name = "morph", version, about = "System builder and source-workspace manager")]
struct Cli {
    /// Raise the log level; repeat for more detail.
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// One repo alias, `prefix=pull,push`. May be given multiple times.
    #[arg(long, global = true)]
    repo_alias: Option<String>,

    #[arg(long, global = true)]
    build_ref_prefix: Option<String>,

    #[arg(long, global = true)]
    no_git_update: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new, empty workspace.
    Init { dir: Option<PathBuf> },
    /// Print the current workspace's root directory.
    Workspace,
    /// Create a new system branch.
    Branch {
        repo: String,
        new: String,
        #[arg(default_value = "master")]
        old: String,
    },
    /// Clone an existing system branch.
    Checkout { repo: String, branch: String },
    /// Print the current system branch's name.
    ShowSystemBranch,
    /// Print the current system branch's root repo.
    ShowBranchRoot,
    /// Rewrite a stratum's (and optionally a chunk's) ref to this branch.
    Edit {
        system: String,
        stratum: String,
        chunk: Option<String>,
    },
    /// Merge another system branch into this one.
    Merge { branch: String },
    /// Synthesize build refs for a system and invoke the builder.
    Build { system: String },
    /// Resolve every chunk ref in the given strata to a commit SHA.
    Petrify { strata: Vec<PathBuf> },
    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective settings (file + env + CLI merged).
    Show,
}

/// Stand-in for the real build engine, which lives entirely outside this
/// crate: it would turn a resolved morphology graph into artifacts. Here it
/// only validates and reports the handed-off request.
struct ExternalBuildEngine;

impl BuildEngine for ExternalBuildEngine {
    fn build(&self, request: &BuildRequest) -> Result<(), Box<dyn std::error::Error>> {
        log::info!(
            "handing off to build engine: {} @ {} ({})",
            request.system_morph,
            request.build_ref,
            request.branch_root.display()
        );
        Ok(())
    }
}

fn default_cache_root() -> PathBuf {
    use etcetera::base_strategy::{BaseStrategy, choose_base_strategy};
    choose_base_strategy()
        .map(|s| s.cache_dir().join("morph"))
        .unwrap_or_else(|_| PathBuf::from(".morph-cache"))
}

fn load_settings(workspace: Option<&Workspace>, cli: &Cli) -> Settings {
    let file_settings = workspace
        .map(|w| Settings::load(&w.settings_path()))
        .transpose()
        .unwrap_or_else(|e| {
            styling::error(&e.to_string());
            std::process::exit(1);
        })
        .unwrap_or_default();

    let env = EnvOverrides::from_env();
    let overrides = CliOverrides {
        repo_alias: cli.repo_alias.clone(),
        build_ref_prefix: cli.build_ref_prefix.clone(),
        no_git_update: cli.no_git_update,
        verbose: cli.verbose > 0,
    };
    file_settings.apply_overrides(&env, &overrides)
}

fn repo_cache(settings: &Settings) -> RepoCache {
    let resolver = RepoAliasResolver::new(settings.repo_alias.clone());
    RepoCache::new(default_cache_root(), resolver, settings.no_git_update)
}

fn resolver(settings: &Settings) -> RepoAliasResolver {
    RepoAliasResolver::new(settings.repo_alias.clone())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Init { dir } => {
            let dir = dir.clone().unwrap_or_else(|| PathBuf::from("."));
            let workspace = BranchLifecycle::init(&dir)?;
            styling::status(&format!("initialized workspace at {}", workspace.root.display()));
            Ok(())
        }
        Commands::Workspace => {
            let workspace = Workspace::deduce()?;
            println!("{}", workspace.root.display());
            Ok(())
        }
        Commands::Branch { repo, new, old } => {
            let workspace = Workspace::deduce()?;
            let settings = load_settings(Some(&workspace), &cli);
            let cache = repo_cache(&settings);
            let resolver = resolver(&settings);
            let lifecycle = BranchLifecycle {
                workspace: &workspace,
                cache: &cache,
                resolver: &resolver,
            };
            let branch = lifecycle.branch(repo, new, old)?;
            styling::status(&format!("created branch {} in {}", branch.name, branch.dir.display()));
            Ok(())
        }
        Commands::Checkout { repo, branch } => {
            let workspace = Workspace::deduce()?;
            let settings = load_settings(Some(&workspace), &cli);
            let cache = repo_cache(&settings);
            let resolver = resolver(&settings);
            let lifecycle = BranchLifecycle {
                workspace: &workspace,
                cache: &cache,
                resolver: &resolver,
            };
            let branch = lifecycle.checkout(repo, branch)?;
            styling::status(&format!("checked out branch {} in {}", branch.name, branch.dir.display()));
            Ok(())
        }
        Commands::ShowSystemBranch => {
            let workspace = Workspace::deduce()?;
            let branch = SystemBranch::deduce(&workspace)?;
            println!("{}", branch.name);
            Ok(())
        }
        Commands::ShowBranchRoot => {
            let workspace = Workspace::deduce()?;
            let branch = SystemBranch::deduce(&workspace)?;
            println!("{}", branch.root_repo()?);
            Ok(())
        }
        Commands::Edit { system, stratum, chunk } => {
            let workspace = Workspace::deduce()?;
            let branch = SystemBranch::deduce(&workspace)?;
            let settings = load_settings(Some(&workspace), &cli);
            let cache = repo_cache(&settings);
            let resolver = resolver(&settings);
            let changelog = morph::edit::edit(&branch, &cache, &resolver, system, stratum, chunk.as_deref())?;
            if settings.verbose {
                styling::changelog(&changelog);
            }
            Ok(())
        }
        Commands::Merge { branch: from_branch } => {
            let workspace = Workspace::deduce()?;
            let branch = SystemBranch::deduce(&workspace)?;
            let settings = load_settings(Some(&workspace), &cli);
            let cache = repo_cache(&settings);
            let resolver = resolver(&settings);
            morph::merge::merge(&workspace, &branch, &cache, &resolver, from_branch)?;
            styling::status(&format!("merged {from_branch} into {}", branch.name));
            Ok(())
        }
        Commands::Build { system } => {
            let workspace = Workspace::deduce()?;
            let branch = SystemBranch::deduce(&workspace)?;
            let settings = load_settings(Some(&workspace), &cli);
            let engine = ExternalBuildEngine;
            morph::build::build(&branch, system, &settings.build_ref_prefix, &engine)?;
            styling::status(&format!("built {system}"));
            Ok(())
        }
        Commands::Petrify { strata } => {
            let workspace = Workspace::deduce()?;
            let settings = load_settings(Some(&workspace), &cli);
            let cache = repo_cache(&settings);
            for path in strata {
                morph::petrify::petrify(&cache, path)?;
                styling::status(&format!("petrified {}", path.display()));
            }
            Ok(())
        }
        Commands::Config(ConfigCommands::Show) => {
            let workspace = Workspace::deduce().ok();
            let settings = load_settings(workspace.as_ref(), &cli);
            let text = toml::to_string_pretty(&settings)?;
            print!("{text}");
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new().filter_level(log_level).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            styling::error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
