//! Project configuration (component J): `<workspace>/.morph/morph.toml`,
//! layered under environment variables and CLI flags.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// One configured repo alias: `prefix:name` expands to `pull`/`push` with
/// `%s` substituted for `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoAlias {
    pub prefix: String,
    pub pull: String,
    pub push: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    pub repo_alias: Vec<RepoAlias>,
    pub build_ref_prefix: String,
    pub no_git_update: bool,
    pub verbose: bool,
    pub syslinux_mbr_search_paths: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            repo_alias: Vec::new(),
            build_ref_prefix: "baserock/builds".to_string(),
            no_git_update: false,
            verbose: false,
            syslinux_mbr_search_paths: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Invalid(toml::de::Error),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "reading morph.toml: {e}"),
            SettingsError::Invalid(e) => write!(f, "morph.toml is invalid: {e}"),
        }
    }
}

impl std::error::Error for SettingsError {}

/// CLI-flag overrides, applied after the file and environment layers.
/// `None` fields mean "flag not passed, inherit from below".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub repo_alias: Option<String>,
    pub build_ref_prefix: Option<String>,
    pub no_git_update: bool,
    pub verbose: bool,
}

impl Settings {
    /// Load `<workspace>/.morph/morph.toml`. A missing file is not an
    /// error: it is equivalent to `Settings::default()`. A present but
    /// unparsable file is.
    pub fn load(path: &Path) -> Result<Settings, SettingsError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Settings::default());
            }
            Err(e) => return Err(SettingsError::Io(e)),
        };
        toml::from_str(&text).map_err(SettingsError::Invalid)
    }

    /// Apply the `MORPH_BUILD_REF_PREFIX` / `MORPH_NO_GIT_UPDATE`
    /// environment variables, then the CLI flags, in that order of
    /// increasing precedence.
    pub fn apply_overrides(mut self, env: &EnvOverrides, cli: &CliOverrides) -> Settings {
        if let Some(prefix) = &env.build_ref_prefix {
            self.build_ref_prefix = prefix.clone();
        }
        if let Some(flag) = env.no_git_update {
            self.no_git_update = flag;
        }

        if let Some(prefix) = &cli.build_ref_prefix {
            self.build_ref_prefix = prefix.clone();
        }
        if cli.no_git_update {
            self.no_git_update = true;
        }
        if cli.verbose {
            self.verbose = true;
        }
        if let Some(alias) = &cli.repo_alias {
            // CLI only ever supplies one alias at a time: `prefix=pull,push`.
            if let Some(parsed) = parse_cli_alias(alias) {
                self.repo_alias.push(parsed);
            }
        }
        self
    }
}

fn parse_cli_alias(s: &str) -> Option<RepoAlias> {
    let (prefix, rest) = s.split_once('=')?;
    let (pull, push) = rest.split_once(',').unwrap_or((rest, rest));
    Some(RepoAlias {
        prefix: prefix.to_string(),
        pull: pull.to_string(),
        push: push.to_string(),
    })
}

/// Environment-variable layer, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub build_ref_prefix: Option<String>,
    pub no_git_update: Option<bool>,
}

impl EnvOverrides {
    pub fn from_env() -> EnvOverrides {
        EnvOverrides {
            build_ref_prefix: std::env::var("MORPH_BUILD_REF_PREFIX").ok(),
            no_git_update: std::env::var("MORPH_NO_GIT_UPDATE")
                .ok()
                .map(|v| !v.is_empty() && v != "0"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("morph.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.build_ref_prefix, "baserock/builds");
    }

    #[test]
    fn malformed_file_is_the_only_failure_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("morph.toml");
        std::fs::write(&path, "build-ref-prefix = [this is not toml").unwrap();
        assert!(matches!(Settings::load(&path), Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn partial_file_fills_gaps_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("morph.toml");
        std::fs::write(&path, "verbose = true\n").unwrap();
        let settings = Settings::load(&path).unwrap();
        assert!(settings.verbose);
        assert_eq!(settings.build_ref_prefix, "baserock/builds");
    }

    #[test]
    fn env_then_cli_override_file_in_precedence_order() {
        let file = Settings {
            build_ref_prefix: "from-file".to_string(),
            ..Settings::default()
        };
        let env = EnvOverrides {
            build_ref_prefix: Some("from-env".to_string()),
            no_git_update: None,
        };
        let cli = CliOverrides::default();
        let merged = file.clone().apply_overrides(&env, &cli);
        assert_eq!(merged.build_ref_prefix, "from-env");

        let cli_wins = CliOverrides {
            build_ref_prefix: Some("from-cli".to_string()),
            ..Default::default()
        };
        let merged = file.apply_overrides(&env, &cli_wins);
        assert_eq!(merged.build_ref_prefix, "from-cli");
    }
}
