use anyhow::{Context, Result};
use facebase_core::DetectionMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration: defaults, then an optional TOML file, then
/// `FACEBASE_*` environment variables. Command-line flags win over all three.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory of reference images, one sub-directory per identity.
    pub database_dir: PathBuf,
    /// CSV file holding the face database.
    pub db_path: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Where annotated query images are written.
    pub output_dir: PathBuf,
    /// Maximum descriptor distance accepted as a match.
    pub max_distance: f32,
    /// Detector used when building the database.
    pub build_mode: DetectionMode,
    /// Detector used for query images.
    pub query_mode: DetectionMode,
    pub upsampling: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_dir: PathBuf::from("database"),
            db_path: PathBuf::from("people.csv"),
            model_dir: PathBuf::from("models"),
            output_dir: PathBuf::from("Outputs"),
            max_distance: 0.7,
            build_mode: DetectionMode::Accurate,
            query_mode: DetectionMode::Fast,
            upsampling: 1,
        }
    }
}

impl Config {
    /// Load configuration from `path` (if given) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Apply `FACEBASE_*` overrides looked up through `var`.
    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = var("FACEBASE_DATABASE_DIR") {
            self.database_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEBASE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("FACEBASE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEBASE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEBASE_MAX_DISTANCE") {
            self.max_distance = v
                .trim()
                .parse()
                .with_context(|| format!("FACEBASE_MAX_DISTANCE: not a number: {v}"))?;
        }
        if let Some(v) = var("FACEBASE_BUILD_MODE") {
            self.build_mode = parse_mode("FACEBASE_BUILD_MODE", &v)?;
        }
        if let Some(v) = var("FACEBASE_QUERY_MODE") {
            self.query_mode = parse_mode("FACEBASE_QUERY_MODE", &v)?;
        }
        if let Some(v) = var("FACEBASE_UPSAMPLING") {
            self.upsampling = v
                .trim()
                .parse()
                .with_context(|| format!("FACEBASE_UPSAMPLING: not a count: {v}"))?;
        }
        Ok(self)
    }
}

fn parse_mode(key: &str, value: &str) -> Result<DetectionMode> {
    value
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{key}: {e}"))
}
