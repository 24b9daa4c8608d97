//! `settings.json` loading and validation.
//!
//! # Validation rules
//!
//! - every connection root must exist or be creatable;
//! - the archive store and its mirror must end in `.gdb`;
//! - output directories are created when absent;
//! - `worker_threads` is bounded to 1..=16, `lookback_years` to 1..=10;
//! - every configured metadata document must be present on disk.
//!
//! Validation failure aborts initialization before any phase runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{invalid, io_err, ConfigError};
use crate::types::Environment;

const MIN_WORKER_THREADS: usize = 1;
const MAX_WORKER_THREADS: usize = 16;
const MIN_LOOKBACK_YEARS: u32 = 1;
const MAX_LOOKBACK_YEARS: u32 = 10;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Root of `settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub connections: Connections,
    pub paths: Paths,
    #[serde(default)]
    pub parameters: Parameters,
}

/// Root directory for each of the four named environments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Connections {
    pub staging: PathBuf,
    pub production: PathBuf,
    pub replicated_production: PathBuf,
    pub external_source: PathBuf,
}

impl Connections {
    /// Resolve the root directory for an environment.
    pub fn root(&self, env: Environment) -> &Path {
        match env {
            Environment::Staging => &self.staging,
            Environment::Production => &self.production,
            Environment::ReplicatedProduction => &self.replicated_production,
            Environment::ExternalSource => &self.external_source,
        }
    }
}

/// Filesystem outputs: the archival store, its mirror, and export/report
/// directories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Paths {
    pub archive_store: PathBuf,
    pub archive_mirror: PathBuf,
    pub summary_tables_dir: PathBuf,
    pub public_download_dir: PathBuf,
    pub metadata_dir: PathBuf,
    pub report_dir: PathBuf,
    #[serde(default)]
    pub metadata_files: MetadataFiles,
}

/// Metadata document filename per dataset role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataFiles {
    pub points_all: String,
    pub points_active: String,
    pub points: String,
    pub lands_all: String,
    pub lands_active: String,
    pub lands: String,
}

impl Default for MetadataFiles {
    fn default() -> Self {
        Self {
            points_all: "WR_PT_Points_All.xml".into(),
            points_active: "WR_PT_Points_Active.xml".into(),
            points: "WR_PT_Points.xml".into(),
            lands_all: "WR_PT_Lands_All.xml".into(),
            lands_active: "WR_PT_Lands_Active.xml".into(),
            lands: "WR_PT_Lands.xml".into(),
        }
    }
}

impl MetadataFiles {
    /// All (role, filename) pairs in a fixed order.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("points_all", self.points_all.as_str()),
            ("points_active", self.points_active.as_str()),
            ("points", self.points.as_str()),
            ("lands_all", self.lands_all.as_str()),
            ("lands_active", self.lands_active.as_str()),
            ("lands", self.lands.as_str()),
        ]
    }
}

/// Workflow parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Parameters {
    /// Status codes counted as active; `null` entries admit rows with no
    /// status at all.
    pub active_status_codes: Vec<Option<String>>,
    /// Duplicate-location detection window, in years before the run date.
    pub lookback_years: u32,
    /// Upper bound applied to every per-phase worker pool.
    pub worker_threads: usize,
    pub skip_summary_tables: bool,
    pub metadata_standard: String,
    pub force_metadata_update: bool,
    /// Whether a failed replication batch stops subsequent batches.
    pub abort_on_batch_failure: bool,
    /// Entity names excluded from the archival permit export.
    pub redacted_entities: Vec<String>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            active_status_codes: vec![Some("A".into()), Some("E".into()), None],
            lookback_years: 2,
            worker_threads: 4,
            skip_summary_tables: false,
            metadata_standard: "ISO 19139".into(),
            force_metadata_update: false,
            abort_on_batch_failure: false,
            redacted_entities: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Load + validate
// ---------------------------------------------------------------------------

impl Settings {
    /// Load and validate `settings.json`.
    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let settings: Settings = serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate semantic rules and create missing output directories.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for env in Environment::all() {
            ensure_dir(self.connections.root(env))?;
        }

        for store in [&self.paths.archive_store, &self.paths.archive_mirror] {
            if store.extension().and_then(|e| e.to_str()) != Some("gdb") {
                return Err(invalid(format!(
                    "geodatabase path must end with .gdb: {}",
                    store.display()
                )));
            }
        }

        for dir in [
            &self.paths.summary_tables_dir,
            &self.paths.public_download_dir,
            &self.paths.metadata_dir,
            &self.paths.report_dir,
        ] {
            ensure_dir(dir)?;
        }

        let threads = self.parameters.worker_threads;
        if !(MIN_WORKER_THREADS..=MAX_WORKER_THREADS).contains(&threads) {
            return Err(invalid(format!(
                "worker_threads must be between {MIN_WORKER_THREADS} and {MAX_WORKER_THREADS}, got {threads}"
            )));
        }

        let lookback = self.parameters.lookback_years;
        if !(MIN_LOOKBACK_YEARS..=MAX_LOOKBACK_YEARS).contains(&lookback) {
            return Err(invalid(format!(
                "lookback_years must be between {MIN_LOOKBACK_YEARS} and {MAX_LOOKBACK_YEARS}, got {lookback}"
            )));
        }

        for (role, filename) in self.paths.metadata_files.entries() {
            let path = self.paths.metadata_dir.join(filename);
            if !path.exists() {
                return Err(invalid(format!(
                    "metadata file for '{role}' does not exist: {}",
                    path.display()
                )));
            }
        }

        Ok(())
    }
}

fn ensure_dir(dir: &Path) -> Result<(), ConfigError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_settings(root: &Path, parameters: &str) -> PathBuf {
        let metadata_dir = root.join("metadata");
        fs::create_dir_all(&metadata_dir).expect("metadata dir");
        for name in [
            "WR_PT_Points_All.xml",
            "WR_PT_Points_Active.xml",
            "WR_PT_Points.xml",
            "WR_PT_Lands_All.xml",
            "WR_PT_Lands_Active.xml",
            "WR_PT_Lands.xml",
        ] {
            fs::write(metadata_dir.join(name), "<metadata/>").expect("metadata file");
        }

        let json = format!(
            r#"{{
  "connections": {{
    "staging": "{root}/staging",
    "production": "{root}/production",
    "replicated_production": "{root}/csa",
    "external_source": "{root}/oracle"
  }},
  "paths": {{
    "archive_store": "{root}/work/PT_Temp.gdb",
    "archive_mirror": "{root}/mirror/WaterRights.gdb",
    "summary_tables_dir": "{root}/summaries",
    "public_download_dir": "{root}/public",
    "metadata_dir": "{root}/metadata",
    "report_dir": "{root}/reports"
  }},
  "parameters": {parameters}
}}"#,
            root = root.display(),
            parameters = parameters,
        );
        let path = root.join("settings.json");
        fs::write(&path, json).expect("settings.json");
        path
    }

    #[test]
    fn load_creates_missing_directories() {
        let tmp = TempDir::new().expect("tmp");
        let path = write_settings(tmp.path(), "{}");
        let settings = Settings::load(&path).expect("load");
        assert!(settings.connections.staging.exists());
        assert!(settings.paths.summary_tables_dir.exists());
        assert_eq!(settings.parameters.worker_threads, 4);
        assert_eq!(
            settings.parameters.active_status_codes,
            vec![Some("A".into()), Some("E".into()), None]
        );
    }

    #[test]
    fn archive_store_must_be_a_gdb_path() {
        let tmp = TempDir::new().expect("tmp");
        let path = write_settings(tmp.path(), "{}");
        let mut settings = Settings::load(&path).expect("load");
        settings.paths.archive_store = tmp.path().join("not_a_store");
        let err = settings.validate().expect_err("suffix check");
        assert!(err.to_string().contains(".gdb"));
    }

    #[test]
    fn thread_count_out_of_range_is_rejected() {
        let tmp = TempDir::new().expect("tmp");
        let path = write_settings(tmp.path(), r#"{"worker_threads": 64}"#);
        let err = Settings::load(&path).expect_err("range check");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn missing_metadata_file_fails_validation() {
        let tmp = TempDir::new().expect("tmp");
        let path = write_settings(tmp.path(), "{}");
        fs::remove_file(tmp.path().join("metadata").join("WR_PT_Lands.xml")).expect("rm");
        let err = Settings::load(&path).expect_err("metadata check");
        assert!(err.to_string().contains("WR_PT_Lands.xml"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let tmp = TempDir::new().expect("tmp");
        let path = write_settings(tmp.path(), r#"{"thread_pool": 3}"#);
        let err = Settings::load(&path).expect_err("deny unknown");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn environment_roots_resolve() {
        let tmp = TempDir::new().expect("tmp");
        let path = write_settings(tmp.path(), "{}");
        let settings = Settings::load(&path).expect("load");
        assert_eq!(
            settings.connections.root(Environment::ExternalSource),
            tmp.path().join("oracle").as_path()
        );
    }
}
