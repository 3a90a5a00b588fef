use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

const DEFAULT_CONFIG_PATH: &str = "config/service.yaml";
const DEFAULT_BUCKET: &str = "deepfake-model-storage-saurav-2025";
const DEFAULT_KEY: &str = "faces_best_model.pth";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: &'static str, value: String },
}

/// What `POST /predict/` does while the model is not loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LoadFailurePolicy {
    /// Keep answering with whatever parameters the network has.
    Serve,
    /// Answer 503 until a model is loaded.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WeightSourceConfig {
    S3 {
        bucket: String,
        key: String,
        #[serde(default)]
        region: Option<String>,
    },
    Local {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub source: WeightSourceConfig,
    pub scratch_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            source: WeightSourceConfig::S3 {
                bucket: DEFAULT_BUCKET.into(),
                key: DEFAULT_KEY.into(),
                region: None,
            },
            scratch_path: PathBuf::from("/tmp/model.pth"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    pub max_upload_bytes: usize,
    pub on_model_load_failure: LoadFailurePolicy,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024,
            on_model_load_failure: LoadFailurePolicy::Serve,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub model: ModelConfig,
    pub serving: ServingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            allowed_origins: vec!["http://localhost:3000".into()],
            model: ModelConfig::default(),
            serving: ServingConfig::default(),
        }
    }
}

fn parse_env<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

impl ServiceConfig {
    /// Reads the YAML file named by `SERVICE_CONFIG` (or `config/service.yaml`
    /// when it exists), then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("SERVICE_CONFIG").ok().map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = parse_env("PORT", port)?;
        }
        if let Some(origins) = lookup("CORS_ALLOWED_ORIGINS") {
            self.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(limit) = lookup("MAX_UPLOAD_BYTES") {
            self.serving.max_upload_bytes = parse_env("MAX_UPLOAD_BYTES", limit)?;
        }
        if let Some(policy) = lookup("ON_MODEL_LOAD_FAILURE") {
            self.serving.on_model_load_failure = parse_env("ON_MODEL_LOAD_FAILURE", policy)?;
        }
        if let Some(path) = lookup("MODEL_SCRATCH_PATH") {
            self.model.scratch_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("MODEL_PATH") {
            self.model.source = WeightSourceConfig::Local {
                path: PathBuf::from(path),
            };
        } else {
            let bucket_override = lookup("MODEL_BUCKET");
            let key_override = lookup("MODEL_KEY");
            let region_override = lookup("AWS_MODEL_REGION");
            if bucket_override.is_some() || key_override.is_some() || region_override.is_some() {
                let (mut bucket, mut key, mut region) = match &self.model.source {
                    WeightSourceConfig::S3 {
                        bucket,
                        key,
                        region,
                    } => (bucket.clone(), key.clone(), region.clone()),
                    WeightSourceConfig::Local { .. } => {
                        (DEFAULT_BUCKET.to_string(), DEFAULT_KEY.to_string(), None)
                    }
                };
                if let Some(b) = bucket_override {
                    bucket = b;
                }
                if let Some(k) = key_override {
                    key = k;
                }
                if region_override.is_some() {
                    region = region_override;
                }
                self.model.source = WeightSourceConfig::S3 {
                    bucket,
                    key,
                    region,
                };
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_fetch_from_s3_and_fail_open() {
        let config = ServiceConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert_eq!(config.serving.on_model_load_failure, LoadFailurePolicy::Serve);
        assert_eq!(config.serving.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.model.scratch_path, PathBuf::from("/tmp/model.pth"));
        assert!(matches!(
            config.model.source,
            WeightSourceConfig::S3 { ref key, .. } if key == "faces_best_model.pth"
        ));
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let config = ServiceConfig::from_yaml(
            r#"
port: 9000
allowed_origins:
  - https://detector.example.com
model:
  source:
    kind: local
    path: /models/faces.pt
serving:
  on_model_load_failure: reject
"#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.allowed_origins, vec!["https://detector.example.com"]);
        assert_eq!(
            config.model.source,
            WeightSourceConfig::Local {
                path: PathBuf::from("/models/faces.pt")
            }
        );
        assert_eq!(config.model.scratch_path, PathBuf::from("/tmp/model.pth"));
        assert_eq!(config.serving.on_model_load_failure, LoadFailurePolicy::Reject);
        assert_eq!(config.serving.max_upload_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn unknown_policy_in_yaml_is_rejected() {
        let err = ServiceConfig::from_yaml("serving:\n  on_model_load_failure: maybe\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = ServiceConfig::default();
        config
            .apply_overrides(env(&[
                ("PORT", "8081"),
                ("CORS_ALLOWED_ORIGINS", "https://a.example, http://localhost:3000,"),
                ("MODEL_KEY", "faces_v2.safetensors"),
                ("ON_MODEL_LOAD_FAILURE", "reject"),
                ("MAX_UPLOAD_BYTES", "1024"),
            ]))
            .unwrap();

        assert_eq!(config.port, 8081);
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "http://localhost:3000"]
        );
        assert_eq!(
            config.model.source,
            WeightSourceConfig::S3 {
                bucket: DEFAULT_BUCKET.into(),
                key: "faces_v2.safetensors".into(),
                region: None,
            }
        );
        assert_eq!(config.serving.on_model_load_failure, LoadFailurePolicy::Reject);
        assert_eq!(config.serving.max_upload_bytes, 1024);
    }

    #[test]
    fn model_path_switches_to_local_source() {
        let mut config = ServiceConfig::default();
        config
            .apply_overrides(env(&[("MODEL_PATH", "./weights.pt"), ("MODEL_KEY", "ignored")]))
            .unwrap();
        assert_eq!(
            config.model.source,
            WeightSourceConfig::Local {
                path: PathBuf::from("./weights.pt")
            }
        );
    }

    #[test]
    fn malformed_port_names_the_variable() {
        let mut config = ServiceConfig::default();
        let err = config.apply_overrides(env(&[("PORT", "eighty")])).unwrap_err();
        assert_eq!(err.to_string(), "invalid value \"eighty\" for PORT");
    }
}
