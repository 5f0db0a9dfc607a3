use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

use crate::retry::RetryPolicy;
use crate::sweep::SweepReach;

pub const DEFAULT_CONFIG_FILE: &str = "comichub.yaml";

/// Everything read once at startup. Components receive the pieces they need
/// explicitly; nothing reads the environment after [`AppConfig::load`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub queue_path: PathBuf,
    pub state_dir: PathBuf,
    pub backup_on_write: bool,
    pub lock_timeout_secs: u64,
    pub http: HttpConfig,
    pub mirror: MirrorConfig,
    pub publish: PublishConfig,
    pub sweep: SweepConfig,
    pub queue: QueueConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            queue_path: PathBuf::from("queue.json"),
            state_dir: PathBuf::from(".comichub"),
            backup_on_write: true,
            lock_timeout_secs: 30,
            http: HttpConfig::default(),
            mirror: MirrorConfig::default(),
            publish: PublishConfig::default(),
            sweep: SweepConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub request_delay_ms: u64,
    pub user_agent: String,
    pub referer: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            retries: 3,
            retry_delay_ms: 2000,
            request_delay_ms: 0,
            user_agent: format!("comichub/{}", env!("CARGO_PKG_VERSION")),
            referer: None,
        }
    }
}

impl HttpConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_millis(self.retry_delay_ms))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorProvider {
    #[default]
    Passthrough,
    Cloudinary,
}

impl MirrorProvider {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "passthrough" | "none" => Ok(Self::Passthrough),
            "cloudinary" => Ok(Self::Cloudinary),
            other => anyhow::bail!("unsupported mirror provider: {other}"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    pub provider: MirrorProvider,
    pub cloudinary: CloudinaryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CloudinaryConfig {
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub folder: String,
    pub api_base_url: String,
}

impl Default for CloudinaryConfig {
    fn default() -> Self {
        Self {
            cloud_name: None,
            api_key: None,
            api_secret: None,
            folder: "greedycomichub".to_owned(),
            api_base_url: "https://api.cloudinary.com/v1_1".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    pub enabled: bool,
    pub repo_dir: PathBuf,
    pub remote: String,
    pub branch: String,
    pub message: String,
    pub github_repo: Option<String>,
    pub github_token: Option<String>,
    pub paths: Vec<PathBuf>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repo_dir: PathBuf::from("."),
            remote: "origin".to_owned(),
            branch: "main".to_owned(),
            message: "Update comic data".to_owned(),
            github_repo: None,
            github_token: None,
            paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    pub reach: SweepReach,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub max_tasks: usize,
    pub max_parallelism: usize,
    pub stale_after_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_tasks: 10,
            max_parallelism: 2,
            stale_after_secs: 30 * 60,
        }
    }
}

impl AppConfig {
    /// Load the optional YAML file, then apply `COMICHUB_*` environment
    /// overrides. An explicitly named file must exist; the default file is
    /// optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_yaml_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).context("deserialize config yaml")
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(value) = var("COMICHUB_DATA_DIR") {
            self.data_dir = PathBuf::from(value);
        }
        if let Some(value) = var("COMICHUB_QUEUE_PATH") {
            self.queue_path = PathBuf::from(value);
        }
        if let Some(value) = var("COMICHUB_STATE_DIR") {
            self.state_dir = PathBuf::from(value);
        }
        if let Some(value) = var("COMICHUB_BACKUP_ON_WRITE") {
            self.backup_on_write = parse_env("COMICHUB_BACKUP_ON_WRITE", &value, parse_bool)?;
        }

        if let Some(value) = var("COMICHUB_HTTP_TIMEOUT_SECS") {
            self.http.timeout_secs = parse_env("COMICHUB_HTTP_TIMEOUT_SECS", &value, parse_num)?;
        }
        if let Some(value) = var("COMICHUB_HTTP_RETRIES") {
            self.http.retries = parse_env("COMICHUB_HTTP_RETRIES", &value, parse_num)?;
        }
        if let Some(value) = var("COMICHUB_HTTP_RETRY_DELAY_MS") {
            self.http.retry_delay_ms = parse_env("COMICHUB_HTTP_RETRY_DELAY_MS", &value, parse_num)?;
        }
        if let Some(value) = var("COMICHUB_HTTP_REQUEST_DELAY_MS") {
            self.http.request_delay_ms =
                parse_env("COMICHUB_HTTP_REQUEST_DELAY_MS", &value, parse_num)?;
        }

        if let Some(value) = var("COMICHUB_MIRROR") {
            self.mirror.provider = parse_env("COMICHUB_MIRROR", &value, MirrorProvider::parse)?;
        }
        let cloudinary = &mut self.mirror.cloudinary;
        if let Some(value) = var("COMICHUB_CLOUDINARY_CLOUD_NAME") {
            cloudinary.cloud_name = non_empty(value);
        }
        if let Some(value) = var("COMICHUB_CLOUDINARY_API_KEY") {
            cloudinary.api_key = non_empty(value);
        }
        if let Some(value) = var("COMICHUB_CLOUDINARY_API_SECRET") {
            cloudinary.api_secret = non_empty(value);
        }

        if let Some(value) = var("COMICHUB_PUBLISH") {
            self.publish.enabled = parse_env("COMICHUB_PUBLISH", &value, parse_bool)?;
        }
        if let Some(value) = var("COMICHUB_GITHUB_REPO") {
            self.publish.github_repo = non_empty(value);
        }
        if let Some(value) = var("COMICHUB_GITHUB_TOKEN") {
            self.publish.github_token = non_empty(value);
        }

        if let Some(value) = var("COMICHUB_SWEEP_REACH") {
            self.sweep.reach = parse_env("COMICHUB_SWEEP_REACH", &value, SweepReach::parse)?;
        }
        Ok(())
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.state_dir.join("locks")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

fn parse_env<T>(
    key: &str,
    raw: &str,
    parse: impl FnOnce(&str) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    parse(raw).with_context(|| format!("invalid {key}={raw:?}"))
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other}"),
    }
}

fn parse_num<T: std::str::FromStr>(raw: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(raw.trim().parse::<T>()?)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn yaml_overrides_defaults() -> anyhow::Result<()> {
        let config = AppConfig::from_yaml_str(
            r#"
data_dir: site/data
http:
  retries: 5
mirror:
  provider: cloudinary
  cloudinary:
    cloud_name: demo
sweep:
  reach: all
"#,
        )?;
        assert_eq!(config.data_dir, PathBuf::from("site/data"));
        assert_eq!(config.http.retries, 5);
        assert_eq!(config.http.timeout_secs, 15);
        assert_eq!(config.mirror.provider, MirrorProvider::Cloudinary);
        assert_eq!(config.mirror.cloudinary.cloud_name.as_deref(), Some("demo"));
        assert_eq!(config.mirror.cloudinary.folder, "greedycomichub");
        assert_eq!(config.sweep.reach, SweepReach::All);
        assert!(config.backup_on_write);
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = AppConfig::from_yaml_str("dataa_dir: x\n").unwrap_err();
        assert!(format!("{err:#}").contains("dataa_dir"));
    }

    #[test]
    fn env_overrides_file() -> anyhow::Result<()> {
        let mut config = AppConfig::default();
        config.apply_env(env(&[
            ("COMICHUB_DATA_DIR", "/tmp/data"),
            ("COMICHUB_HTTP_RETRY_DELAY_MS", "0"),
            ("COMICHUB_PUBLISH", "yes"),
            ("COMICHUB_GITHUB_TOKEN", "  "),
            ("COMICHUB_CLOUDINARY_API_SECRET", "s3cret"),
        ]))?;
        assert_eq!(config.data_dir, PathBuf::from("/tmp/data"));
        assert_eq!(config.http.retry_delay_ms, 0);
        assert!(config.publish.enabled);
        assert_eq!(config.publish.github_token, None);
        assert_eq!(config.mirror.cloudinary.api_secret.as_deref(), Some("s3cret"));
        Ok(())
    }

    #[test]
    fn invalid_env_value_names_the_variable() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("COMICHUB_HTTP_RETRIES", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("COMICHUB_HTTP_RETRIES"), "{err:#}");
    }
}
