//! Configuration loader and validator for the batch image generator.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::{AspectRatio, RunConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub api: Api,
    pub generation: Generation,
    #[serde(default)]
    pub imagefx: Option<ImageFx>,
}

/// Local paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Where auto-saved images land. Defaults to `<data_dir>/images`.
    #[serde(default)]
    pub save_dir: Option<String>,
}

/// The intermediary service (login and generation).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    pub base_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Proxy,
    Imagefx,
}

/// Defaults for each generation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Generation {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default = "default_auto_save")]
    pub auto_save: bool,
}

/// Direct ImageFX access, used when `generation.backend` is `imagefx`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageFx {
    pub endpoint: String,
    pub token: String,
    #[serde(default = "default_candidates")]
    pub candidates: u32,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_timeout_seconds() -> u64 {
    20
}

fn default_auto_save() -> bool {
    true
}

fn default_candidates() -> u32 {
    4
}

fn default_model() -> String {
    "IMAGEN_3_1".to_string()
}

impl Config {
    pub fn resolved_save_dir(&self) -> String {
        match self.app.save_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => dir.to_string(),
            _ => format!("{}/images", self.app.data_dir.trim_end_matches('/')),
        }
    }

    /// Ensure `app.data_dir` and the save directory exist.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.data_dir)?;
        fs::create_dir_all(self.resolved_save_dir())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_seconds)
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url(&self.api.base_url)
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            aspect_ratio: self.generation.aspect_ratio,
            auto_save: self.generation.auto_save,
        }
    }
}

/// `Url::join` drops the last path segment unless the base ends in `/`.
fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&with_slash).map_err(|_| ConfigError::Invalid("api.base_url must be a valid URL"))
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.api.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("api.base_url must be non-empty"));
    }
    parse_base_url(&cfg.api.base_url)?;
    if cfg.api.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("api.timeout_seconds must be > 0"));
    }

    if cfg.generation.backend == Backend::Imagefx {
        let Some(fx) = &cfg.imagefx else {
            return Err(ConfigError::Invalid(
                "imagefx section is required when generation.backend is imagefx",
            ));
        };
        if Url::parse(fx.endpoint.trim()).is_err() {
            return Err(ConfigError::Invalid("imagefx.endpoint must be a valid URL"));
        }
        if fx.token.trim().is_empty() {
            return Err(ConfigError::Invalid("imagefx.token must be non-empty"));
        }
        if fx.candidates == 0 {
            return Err(ConfigError::Invalid("imagefx.candidates must be > 0"));
        }
        if fx.model.trim().is_empty() {
            return Err(ConfigError::Invalid("imagefx.model must be non-empty"));
        }
    }

    Ok(())
}

/// Sample configuration, also printed by `imagen-batch init-config`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  save_dir: "./data/images"

api:
  base_url: "http://localhost:3000/"
  timeout_seconds: 20

generation:
  # proxy: go through the intermediary at api.base_url
  # imagefx: call ImageFX directly with imagefx.token
  backend: proxy
  aspect_ratio: IMAGE_ASPECT_RATIO_LANDSCAPE_FOUR_THREE
  auto_save: true

imagefx:
  endpoint: "https://aisandbox-pa.googleapis.com/v1:runImageFx"
  token: "YOUR_IMAGEFX_BEARER_TOKEN"
  candidates: 4
  model: "IMAGEN_3_1"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.generation.backend, Backend::Proxy);
        assert_eq!(cfg.generation.aspect_ratio, AspectRatio::Landscape43);
        assert_eq!(cfg.timeout(), Duration::from_secs(20));
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let cfg: Config = serde_yaml::from_str(
            "app:\n  data_dir: ./d\napi:\n  base_url: http://h/x\ngeneration: {}\n",
        )
        .unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.api.timeout_seconds, 20);
        assert!(cfg.generation.auto_save);
        assert_eq!(cfg.resolved_save_dir(), "./d/images");
        assert_eq!(cfg.base_url().unwrap().as_str(), "http://h/x/");
        assert!(cfg.imagefx.is_none());
    }

    #[test]
    fn invalid_base_url() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.api.base_url = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("api.base_url")),
            _ => panic!("wrong error"),
        }

        cfg.api.base_url = "not a url".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.api.timeout_seconds = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn imagefx_backend_needs_token() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.generation.backend = Backend::Imagefx;
        validate(&cfg).unwrap();

        cfg.imagefx.as_mut().unwrap().token = " ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("imagefx.token")),
            _ => panic!("wrong error"),
        }

        cfg.imagefx = None;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_and_save_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.app.save_dir = None;
        cfg.ensure_dirs().unwrap();
        assert!(data_path.join("images").exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.imagefx.unwrap().candidates, 4);
    }
}
