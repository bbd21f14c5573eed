//! Migration configuration
//!
//! Loaded from TOML; every field has a default, so an empty file is valid.
//!
//! ```toml
//! granularity = "file"
//! patch_strategy = "positional"
//! build_scope = "project"
//! base_branch = "main"
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use sqlport_findings::Granularity;
use sqlport_patch::PatchStrategy;
use std::path::{Path, PathBuf};

/// How rewrites reach the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One branch, build check and patch per file
    #[default]
    Verified,
    /// Patch the tree in place and emit one combined diff
    Direct,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "verified" => Ok(Self::Verified),
            "direct" => Ok(Self::Direct),
            other => Err(format!("unknown mode '{other}' (expected verified|direct)")),
        }
    }
}

/// What a per-attempt build check compiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildScope {
    /// Only the patched file
    #[default]
    File,
    /// The whole project
    Project,
}

impl std::str::FromStr for BuildScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "project" => Ok(Self::Project),
            other => Err(format!("unknown build scope '{other}' (expected file|project)")),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    /// Task grouping
    pub granularity: Granularity,
    /// Replacement strategy
    pub patch_strategy: PatchStrategy,
    /// Verified (per-file branches) or direct
    pub mode: Mode,
    /// Per-attempt build scope
    pub build_scope: BuildScope,
    /// Run a full build once after all attempts
    pub final_full_check: bool,
    /// Branch attempts start from; `None` means the current branch
    pub base_branch: Option<String>,
    /// Prefix of attempt branch names
    pub branch_prefix: String,
    /// Where patches and the run report are written
    pub output_dir: PathBuf,
    /// File name of the combined diff in direct mode
    pub combined_patch_name: String,
    /// First line of every commit message
    pub commit_prefix: String,
    /// Whole-run timeout, enforced by the caller
    pub run_timeout_secs: u64,
}

impl MigrationConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` for invalid TOML and `ConfigError::Invalid`
    /// for out-of-range values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Returns `ConfigError::Io` if the file cannot be read
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Check value constraints
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = self.branch_prefix.trim();
        if prefix.is_empty() || prefix.contains(char::is_whitespace) || prefix.ends_with('/') {
            return Err(ConfigError::Invalid {
                field: "branch_prefix",
                reason: format!("'{}' is not a usable branch prefix", self.branch_prefix),
            });
        }
        if self.combined_patch_name.trim().is_empty() || self.combined_patch_name.contains('/') {
            return Err(ConfigError::Invalid {
                field: "combined_patch_name",
                reason: "must be a plain file name".to_string(),
            });
        }
        if self.run_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "run_timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// With granularity
    #[inline]
    #[must_use]
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// With patch strategy
    #[inline]
    #[must_use]
    pub fn with_patch_strategy(mut self, strategy: PatchStrategy) -> Self {
        self.patch_strategy = strategy;
        self
    }

    /// With mode
    #[inline]
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// With build scope
    #[inline]
    #[must_use]
    pub fn with_build_scope(mut self, scope: BuildScope) -> Self {
        self.build_scope = scope;
        self
    }

    /// With end-of-run full build
    #[inline]
    #[must_use]
    pub fn with_final_full_check(mut self, enabled: bool) -> Self {
        self.final_full_check = enabled;
        self
    }

    /// With base branch
    #[inline]
    #[must_use]
    pub fn with_base_branch(mut self, branch: impl Into<String>) -> Self {
        self.base_branch = Some(branch.into());
        self
    }

    /// With branch prefix
    #[inline]
    #[must_use]
    pub fn with_branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.branch_prefix = prefix.into();
        self
    }

    /// With output directory
    #[inline]
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// With commit message prefix
    #[inline]
    #[must_use]
    pub fn with_commit_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.commit_prefix = prefix.into();
        self
    }

    /// With run timeout
    #[inline]
    #[must_use]
    pub fn with_run_timeout_secs(mut self, secs: u64) -> Self {
        self.run_timeout_secs = secs;
        self
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::Method,
            patch_strategy: PatchStrategy::Substring,
            mode: Mode::Verified,
            build_scope: BuildScope::File,
            final_full_check: false,
            base_branch: None,
            branch_prefix: "sqlport".to_string(),
            output_dir: PathBuf::from("sqlport-patches"),
            combined_patch_name: "migration.diff".to_string(),
            commit_prefix: "Migrate DB2 SQL to PostgreSQL".to_string(),
            run_timeout_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(MigrationConfig::from_toml_str("").unwrap(), MigrationConfig::default());
    }

    #[test]
    fn parses_overrides() {
        let config = MigrationConfig::from_toml_str(
            r#"
            granularity = "file"
            patch_strategy = "positional"
            mode = "direct"
            build_scope = "project"
            final_full_check = true
            base_branch = "main"
            output_dir = "out"
            "#,
        )
        .unwrap();

        assert_eq!(config.granularity, Granularity::File);
        assert_eq!(config.patch_strategy, PatchStrategy::Positional);
        assert_eq!(config.mode, Mode::Direct);
        assert_eq!(config.build_scope, BuildScope::Project);
        assert!(config.final_full_check);
        assert_eq!(config.base_branch.as_deref(), Some("main"));
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.branch_prefix, "sqlport");
    }

    #[test]
    fn rejects_unknown_fields_and_bad_values() {
        assert!(matches!(
            MigrationConfig::from_toml_str("granularty = \"file\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            MigrationConfig::from_toml_str("branch_prefix = \"a b\""),
            Err(ConfigError::Invalid { field: "branch_prefix", .. })
        ));
        assert!(matches!(
            MigrationConfig::from_toml_str("run_timeout_secs = 0"),
            Err(ConfigError::Invalid { field: "run_timeout_secs", .. })
        ));
    }

    #[test]
    fn builders_chain() {
        let config = MigrationConfig::new()
            .with_mode(Mode::Direct)
            .with_base_branch("develop")
            .with_branch_prefix("mig");
        assert_eq!(config.mode, Mode::Direct);
        assert_eq!(config.base_branch.as_deref(), Some("develop"));
        assert_eq!(config.branch_prefix, "mig");
    }

    #[test]
    fn mode_and_scope_parse() {
        assert_eq!("Direct".parse::<Mode>(), Ok(Mode::Direct));
        assert_eq!("project".parse::<BuildScope>(), Ok(BuildScope::Project));
        assert!("ci".parse::<BuildScope>().is_err());
    }

    #[tokio::test]
    async fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = MigrationConfig::load(dir.path().join("nope.toml")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
