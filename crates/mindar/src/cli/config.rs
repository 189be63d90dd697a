//! Settings for mindar
//!
//! Everything lives under ~/.mindar/ (or `$MINDAR_HOME`):
//! `config.toml`, `logs/` and the default database `mindar.sqlite3`.
//! Command flags override the file.

use crate::cli::error::HelpfulError;
use mindar_db::{DbError, MindarDb};
use mindar_ingest::{Catalog, RoiMap};
use mindar_storage::{AwsCredentials, LocalObjectStore, ObjectStore, S3Config, S3ObjectStore};
use mindar_workflow::{ToolCommand, WorkflowConfig, DEFAULT_SOURCE_BUCKET};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use mindar_logging::{logs_dir, mindar_home};

const CONFIG_FILE: &str = "config.toml";
const DEFAULT_DB_FILE: &str = "mindar.sqlite3";
const DEFAULT_RESULTS_BUCKET: &str = "ndar-data";

// ============================================================================
// config.toml
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub workflow: WorkflowSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    /// Bucket mirrored in a local directory.
    Local,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::S3 => "s3",
            StorageBackend::Local => "local",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    /// Directory holding the bucket for the local backend.
    pub local_root: Option<PathBuf>,
    /// Credentials CSV (access key id and secret access key).
    pub credentials: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            bucket: DEFAULT_RESULTS_BUCKET.to_string(),
            region: None,
            endpoint: None,
            force_path_style: false,
            local_root: None,
            credentials: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub work_root: Option<PathBuf>,
    pub source_bucket: String,
    pub unpack_program: String,
    pub unpack_args: Vec<String>,
    pub unpack_timeout_secs: u64,
    pub pipeline_program: String,
    pub pipeline_args: Vec<String>,
    pub pipeline_timeout_secs: u64,
    /// Catalog entry the pipeline outputs are loaded with.
    pub catalog_pipeline: String,
    pub roi_map: Option<PathBuf>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        let args = |list: &[&str]| -> Vec<String> { list.iter().map(|s| s.to_string()).collect() };
        Self {
            work_root: None,
            source_bucket: DEFAULT_SOURCE_BUCKET.to_string(),
            unpack_program: "ndar_unpack".to_string(),
            unpack_args: args(&[
                "--aws-access-key-id",
                "{access_key_id}",
                "--aws-secret-access-key",
                "{secret_access_key}",
                "-v",
                "{input}",
                "{source}",
            ]),
            unpack_timeout_secs: 60 * 60,
            pipeline_program: "ndar_act_workflow".to_string(),
            pipeline_args: args(&["{input}", "{work_dir}", "{output_dir}", "{crash_dir}"]),
            pipeline_timeout_secs: 24 * 60 * 60,
            catalog_pipeline: "act".to_string(),
            roi_map: None,
        }
    }
}

/// Flags shared by every command that touches the database or the bucket.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct SharedArgs {
    /// Results database file
    #[arg(long, env = "MINDAR_DATABASE")]
    pub database: Option<PathBuf>,

    /// Results bucket
    #[arg(long, env = "MINDAR_BUCKET")]
    pub bucket: Option<String>,

    /// Pipeline catalog YAML (defaults to the built-in catalog)
    #[arg(long)]
    pub catalog: Option<PathBuf>,
}

pub fn config_path() -> PathBuf {
    mindar_home().join(CONFIG_FILE)
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Read ~/.mindar/config.toml; a missing file gives the defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).map_err(|err| {
            HelpfulError::new(format!("Cannot read {}", path.display())).with_context(err.to_string())
        })?;
        let settings = Self::from_toml_str(&text).map_err(|err| {
            HelpfulError::new(format!("Invalid configuration file: {}", path.display()))
                .with_context(err.to_string())
                .with_suggestion("TRY: Sections are [database], [storage] and [workflow]")
        })?;
        Ok(settings)
    }

    /// Settings from the file with command flags applied on top.
    pub fn resolve(shared: &SharedArgs) -> anyhow::Result<Self> {
        Ok(Self::load()?.with_overrides(shared))
    }

    pub fn with_overrides(mut self, shared: &SharedArgs) -> Self {
        if let Some(path) = &shared.database {
            self.database.path = Some(path.clone());
        }
        if let Some(bucket) = &shared.bucket {
            self.storage.bucket = bucket.clone();
        }
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| mindar_home().join(DEFAULT_DB_FILE))
    }

    pub fn local_root(&self) -> PathBuf {
        self.storage
            .local_root
            .clone()
            .unwrap_or_else(|| mindar_home().join("buckets").join(&self.storage.bucket))
    }

    pub fn work_root(&self) -> PathBuf {
        self.workflow
            .work_root
            .clone()
            .unwrap_or_else(|| mindar_home().join("work"))
    }

    /// Keys from the configured CSV, else from the environment.
    pub fn credentials(&self) -> anyhow::Result<Option<AwsCredentials>> {
        match &self.storage.credentials {
            Some(path) => {
                let creds = AwsCredentials::from_csv(path)
                    .map_err(|err| HelpfulError::storage_unavailable(&err.to_string()))?;
                Ok(Some(creds))
            }
            None => Ok(AwsCredentials::from_env()),
        }
    }

    pub fn unpack_command(&self) -> ToolCommand {
        let wf = &self.workflow;
        ToolCommand {
            program: wf.unpack_program.clone(),
            args: wf.unpack_args.clone(),
            timeout_secs: wf.unpack_timeout_secs,
        }
    }

    pub fn workflow_config(&self, credentials: Option<AwsCredentials>) -> WorkflowConfig {
        let wf = &self.workflow;
        WorkflowConfig {
            work_root: self.work_root(),
            source_bucket: wf.source_bucket.clone(),
            unpack: self.unpack_command(),
            pipeline: ToolCommand {
                program: wf.pipeline_program.clone(),
                args: wf.pipeline_args.clone(),
                timeout_secs: wf.pipeline_timeout_secs,
            },
            catalog_pipeline: wf.catalog_pipeline.clone(),
            credentials,
        }
    }
}

// ============================================================================
// Opening resources
// ============================================================================

/// Current-thread runtime for one command.
pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

pub async fn open_db(settings: &Settings) -> anyhow::Result<MindarDb> {
    let path = settings.database_path();
    let db = MindarDb::open(&path)
        .await
        .map_err(|err| HelpfulError::database_unavailable(&path, &err.to_string()))?;
    Ok(db)
}

/// Open a database that must already exist, for commands that only read
/// what earlier runs stored.
pub async fn open_existing_db(settings: &Settings) -> anyhow::Result<MindarDb> {
    let path = settings.database_path();
    let db = MindarDb::open_existing(&path).await.map_err(|err| match err {
        DbError::NotFound(_) => HelpfulError::new(format!("Database not found: {}", path.display()))
            .with_suggestions([
                "TRY: Run mindar import-subjects or mindar run first",
                "TRY: Point --database or MINDAR_DATABASE at an existing database",
            ]),
        other => HelpfulError::database_unavailable(&path, &other.to_string()),
    })?;
    Ok(db)
}

pub async fn connect_store(settings: &Settings) -> anyhow::Result<Box<dyn ObjectStore>> {
    let storage = &settings.storage;
    match storage.backend {
        StorageBackend::Local => {
            let root = settings.local_root();
            let store = LocalObjectStore::new(&root, storage.bucket.as_str()).map_err(|err| {
                HelpfulError::storage_unavailable(&format!("{}: {}", root.display(), err))
            })?;
            Ok(Box::new(store))
        }
        StorageBackend::S3 => {
            let config = S3Config {
                bucket: storage.bucket.clone(),
                region: storage.region.clone(),
                endpoint: storage.endpoint.clone(),
                force_path_style: storage.force_path_style,
                credentials: settings.credentials()?,
            };
            let store = S3ObjectStore::connect(config)
                .await
                .map_err(|err| HelpfulError::storage_unavailable(&err.to_string()))?;
            Ok(Box::new(store))
        }
    }
}

pub fn load_catalog(path: Option<&Path>) -> anyhow::Result<Catalog> {
    match path {
        Some(path) => {
            if !path.exists() {
                return Err(HelpfulError::file_not_found(path).into());
            }
            let catalog = Catalog::load(path).map_err(|err| {
                HelpfulError::yaml_parse_error(path, "a `pipelines:` mapping", &err.to_string())
            })?;
            Ok(catalog)
        }
        None => Ok(Catalog::builtin()?),
    }
}

pub fn load_roi_map(path: Option<&Path>) -> anyhow::Result<Option<RoiMap>> {
    let Some(path) = path else {
        return Ok(None);
    };
    if !path.exists() {
        return Err(HelpfulError::file_not_found(path).into());
    }
    let map = RoiMap::load(path).map_err(|err| {
        HelpfulError::yaml_parse_error(path, "a mapping of ROI label to description", &err.to_string())
    })?;
    Ok(Some(map))
}

/// Read a YAML input file into `T`.
pub fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path, expected: &str) -> anyhow::Result<T> {
    if !path.exists() {
        return Err(HelpfulError::file_not_found(path).into());
    }
    let text = std::fs::read_to_string(path)?;
    let value = serde_yaml::from_str(&text)
        .map_err(|err| HelpfulError::yaml_parse_error(path, expected, &err.to_string()))?;
    Ok(value)
}

// ============================================================================
// config command
// ============================================================================

/// Arguments for the config command
#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    /// Show resolved settings in JSON format
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub shared: SharedArgs,
}

fn exists_label(path: &Path) -> &'static str {
    if path.exists() {
        "exists"
    } else {
        "not found"
    }
}

/// Run the config command - shows resolved paths and settings
pub fn run(args: ConfigArgs) -> anyhow::Result<()> {
    let settings = Settings::resolve(&args.shared)?;
    let home = mindar_home();
    let config_file = config_path();
    let database = settings.database_path();
    let logs = logs_dir();
    let storage = &settings.storage;
    let wf = &settings.workflow;
    let env_keys = AwsCredentials::from_env().is_some();

    if args.json {
        let config = serde_json::json!({
            "home": home.to_string_lossy(),
            "config_file": {
                "path": config_file.to_string_lossy(),
                "exists": config_file.exists(),
            },
            "database": {
                "path": database.to_string_lossy(),
                "exists": database.exists(),
            },
            "logs": logs.to_string_lossy(),
            "storage": {
                "backend": storage.backend.as_str(),
                "bucket": storage.bucket,
                "region": storage.region,
                "endpoint": storage.endpoint,
                "force_path_style": storage.force_path_style,
                "local_root": matches!(storage.backend, StorageBackend::Local)
                    .then(|| settings.local_root().to_string_lossy().into_owned()),
                "credentials": {
                    "file": storage.credentials.as_ref().map(|p| p.to_string_lossy().into_owned()),
                    "environment": env_keys,
                    "keys": "<redacted>",
                },
            },
            "workflow": {
                "work_root": settings.work_root().to_string_lossy(),
                "source_bucket": wf.source_bucket,
                "catalog_pipeline": wf.catalog_pipeline,
                "roi_map": wf.roi_map.as_ref().map(|p| p.to_string_lossy().into_owned()),
                "unpack": {
                    "program": wf.unpack_program,
                    "args": wf.unpack_args,
                    "timeout_secs": wf.unpack_timeout_secs,
                },
                "pipeline": {
                    "program": wf.pipeline_program,
                    "args": wf.pipeline_args,
                    "timeout_secs": wf.pipeline_timeout_secs,
                },
            },
        });
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("MINDAR CONFIGURATION");
        println!("====================");
        println!();
        println!("Home:      {}", home.display());
        println!("Config:    {} ({})", config_file.display(), exists_label(&config_file));
        println!("Database:  {} ({})", database.display(), exists_label(&database));
        println!("Logs:      {}", logs.display());
        println!();
        println!("Storage:   {} bucket {}", storage.backend.as_str(), storage.bucket);
        if matches!(storage.backend, StorageBackend::Local) {
            println!("  Root:    {}", settings.local_root().display());
        }
        match &storage.credentials {
            Some(path) => println!("  Keys:    {} ({})", path.display(), exists_label(path)),
            None if env_keys => println!("  Keys:    environment"),
            None => println!("  Keys:    default provider chain"),
        }
        println!();
        println!("Workflow:  {}", settings.work_root().display());
        println!("  Source bucket: {}", wf.source_bucket);
        println!("  Unpack:        {} ({}s)", wf.unpack_program, wf.unpack_timeout_secs);
        println!("  Pipeline:      {} ({}s)", wf.pipeline_program, wf.pipeline_timeout_secs);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.storage.backend, StorageBackend::S3);
        assert_eq!(settings.storage.bucket, "ndar-data");
        assert_eq!(settings.workflow.source_bucket, "NDAR_Central");
        assert_eq!(settings.workflow.catalog_pipeline, "act");
    }

    #[test]
    fn test_partial_sections() {
        let settings = Settings::from_toml_str(
            r#"
            [database]
            path = "/data/results.sqlite3"

            [storage]
            backend = "local"
            bucket = "fcp-indi"
            local_root = "/mirror/fcp-indi"

            [workflow]
            pipeline_program = "act.sh"
            pipeline_timeout_secs = 120
            "#,
        )
        .unwrap();

        assert_eq!(settings.database_path(), PathBuf::from("/data/results.sqlite3"));
        assert_eq!(settings.storage.backend, StorageBackend::Local);
        assert_eq!(settings.local_root(), PathBuf::from("/mirror/fcp-indi"));
        assert_eq!(settings.workflow.pipeline_program, "act.sh");
        assert_eq!(settings.workflow.pipeline_timeout_secs, 120);
        // Untouched fields keep their defaults
        assert_eq!(settings.workflow.unpack_program, "ndar_unpack");
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(Settings::from_toml_str("[storage]\nbackend = \"ftp\"\n").is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let settings = Settings::from_toml_str("[storage]\nbucket = \"from-file\"\n").unwrap();
        let shared = SharedArgs {
            database: Some(PathBuf::from("/tmp/override.sqlite3")),
            bucket: Some("from-flag".to_string()),
            catalog: None,
        };
        let settings = settings.with_overrides(&shared);
        assert_eq!(settings.storage.bucket, "from-flag");
        assert_eq!(settings.database_path(), PathBuf::from("/tmp/override.sqlite3"));
    }

    #[test]
    fn test_workflow_config_carries_commands() {
        let mut settings = Settings::default();
        settings.workflow.work_root = Some(PathBuf::from("/scratch"));
        let config = settings.workflow_config(Some(AwsCredentials::new("id", "secret")));

        assert_eq!(config.work_root, PathBuf::from("/scratch"));
        assert_eq!(config.unpack.program, "ndar_unpack");
        assert!(config.unpack.args.contains(&"{secret_access_key}".to_string()));
        assert_eq!(config.pipeline.timeout_secs, 24 * 60 * 60);
        assert_eq!(config.credentials.unwrap().access_key_id, "id");
    }
}
