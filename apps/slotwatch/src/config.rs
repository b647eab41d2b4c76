use std::{env, fmt, fs, io, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::validation::{validate_check_interval, validate_target_url, validate_timeout};
use crate::monitoring::{BoolField, Registry, RegistryError, Target};
use crate::notify::telegram::DEFAULT_API_BASE;

pub const ENV_TELEGRAM_TOKEN: &str = "SLOTWATCH_TELEGRAM_TOKEN";
pub const ENV_CHECK_INTERVAL: &str = "SLOTWATCH_CHECK_INTERVAL";

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("neither XDG_CONFIG_HOME nor a home directory is available")]
    ConfigPathUnavailable,
    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("invalid configuration: {0:#}")]
    Invalid(anyhow::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub polling: Polling,
    pub state: State,
    pub logging: Logging,
    pub telegram: Telegram,
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Polling {
    pub check_interval_seconds: u64,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
    pub path: path::PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// Plain-text log file in addition to the console
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<path::PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telegram {
    /// Without a token, messages are written to the log instead
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_success_field")]
    pub success_field: String,
    #[serde(default = "default_message_field", skip_serializing_if = "Option::is_none")]
    pub message_field: Option<String>,
    /// Request document POSTed as JSON on every probe
    #[serde(default = "empty_body")]
    pub body: serde_json::Value,
}

fn empty_body() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_success_field() -> String {
    "isSuccess".into()
}

fn default_message_field() -> Option<String> {
    Some("message".into())
}

impl Default for Polling {
    fn default() -> Self {
        Self { check_interval_seconds: 30, timeout_seconds: 10 }
    }
}

impl Default for State {
    fn default() -> Self {
        Self { path: path::PathBuf::from("data/state.json") }
    }
}

impl Default for Telegram {
    fn default() -> Self {
        Self { token: None, api_base: DEFAULT_API_BASE.into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/slotwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("slotwatch/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Polling")?;
        write_1(f, "Check Interval (s)", &self.polling.check_interval_seconds)?;
        write_1(f, "Timeout (s)", &self.polling.timeout_seconds)?;
        write_title_1(f, "State")?;
        write_1(f, "Path", &self.state.path.display())?;
        write_title_1(f, "Logging")?;
        match &self.logging.file {
            Some(file) => write_1(f, "File", &file.display())?,
            None => write_1(f, "File", &"(console only)")?,
        }
        write_title_1(f, "Telegram")?;
        write_1(f, "API Base", &self.telegram.api_base)?;
        write_1(f, "Token", &if self.telegram.token.is_some() { "(set)" } else { "(not set)" })?;
        write_title_1(f, "Targets")?;
        for target in &self.targets {
            write_1(f, &target.id, &target.name)?;
            write_2(f, "URL", &target.url)?;
            write_2(f, "Success Field", &target.success_field)?;
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/slotwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```no_run
    /// # use slotwatch::config::Config;
    /// let cfg = Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), slotwatch::config::Error>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;
        let to_error = |source| Error::WriteFailed { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(to_error)?;
        }

        fs::write(path, config_str).map_err(to_error)
    }

    /// Apply `SLOTWATCH_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self, Error> {
        self.with_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production)
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        if let Some(token) = lookup(ENV_TELEGRAM_TOKEN).filter(|token| !token.is_empty()) {
            self.telegram.token = Some(token);
        }

        if let Some(value) = lookup(ENV_CHECK_INTERVAL) {
            self.polling.check_interval_seconds = value
                .trim()
                .parse()
                .map_err(|_| Error::InvalidEnv { name: ENV_CHECK_INTERVAL, value })?;
        }

        Ok(self)
    }

    /// Check bounds and URLs before anything is scheduled
    pub fn validate(&self) -> Result<(), Error> {
        validate_check_interval(self.polling.check_interval_seconds).map_err(Error::Invalid)?;
        validate_timeout(self.polling.timeout_seconds).map_err(Error::Invalid)?;
        for target in &self.targets {
            validate_target_url(&target.url).map_err(Error::Invalid)?;
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.polling.check_interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.polling.timeout_seconds)
    }

    pub fn build_registry(&self) -> Result<Registry, Error> {
        let targets = self.targets.iter().map(|target| {
            let mut predicate = BoolField::new(&target.success_field);
            predicate.message_field = target.message_field.clone();

            Target::new(target.id.as_str(), &target.name, &target.url, target.body.clone())
                .with_predicate(predicate)
        });

        Ok(Registry::new(targets)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[polling]
check_interval_seconds = 15

[telegram]
token = "123:abc"

[[targets]]
id = "43"
name = "Khutorok"
url = "https://admin3.zapytai.by/widget/createBooking"

[targets.body]
isAgree = true
numberOfAdult = "8"

[targets.body.selectedCamping]
value = "43"
capacity = 8

[[targets]]
id = "44"
name = "Perevoloka"
url = "https://admin3.zapytai.by/widget/createBooking"
success_field = "isSuccessful"
"#;

    #[test]
    fn parses_targets_and_keeps_defaults() {
        let config: Config = toml::from_str(SAMPLE).unwrap();

        assert_eq!(config.polling.check_interval_seconds, 15);
        assert_eq!(config.polling.timeout_seconds, 10);
        assert_eq!(config.state.path, path::PathBuf::from("data/state.json"));
        assert_eq!(config.telegram.api_base, DEFAULT_API_BASE);
        assert_eq!(config.targets.len(), 2);
        assert_eq!(
            config.targets[0].body,
            json!({
                "isAgree": true,
                "numberOfAdult": "8",
                "selectedCamping": { "value": "43", "capacity": 8 },
            })
        );
        assert_eq!(config.targets[1].success_field, "isSuccessful");
        assert_eq!(config.targets[1].body, json!({}));
        assert_eq!(config.targets[1].message_field.as_deref(), Some("message"));
        config.validate().unwrap();
    }

    #[test]
    fn registry_uses_configured_success_field() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let registry = config.build_registry().unwrap();

        let perevoloka = registry.get(&"44".into()).unwrap();
        assert_eq!(
            perevoloka.interpret(&json!({ "isSuccessful": true })),
            crate::monitoring::ProbeOutcome::Success
        );
    }

    #[test]
    fn duplicate_target_ids_are_rejected() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.targets[1].id = "43".into();

        assert!(matches!(config.build_registry(), Err(Error::Registry(_))));
    }

    #[test]
    fn creates_default_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/slotwatch");

        let config = Config::from_config(Some(&path)).unwrap();

        assert_eq!(config, Config::default());
        let written = dir.path().join("nested/slotwatch.toml");
        assert!(written.exists());
        assert_eq!(Config::from_config(Some(&written)).unwrap(), config);
    }

    #[test]
    fn written_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config: Config = toml::from_str(SAMPLE).unwrap();

        config.write_config(&path).unwrap();

        assert_eq!(Config::from_config(Some(&path)).unwrap(), config);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_TELEGRAM_TOKEN, "999:zzz"), (ENV_CHECK_INTERVAL, " 60 ")]);

        let config = Config::default()
            .with_overrides(|name| env.get(name).map(|value| value.to_string()))
            .unwrap();

        assert_eq!(config.telegram.token.as_deref(), Some("999:zzz"));
        assert_eq!(config.check_interval(), Duration::from_secs(60));
    }

    #[test]
    fn bad_interval_override_is_an_error() {
        let err = Config::default()
            .with_overrides(|name| (name == ENV_CHECK_INTERVAL).then(|| "soon".to_string()))
            .unwrap_err();

        assert!(matches!(err, Error::InvalidEnv { name: ENV_CHECK_INTERVAL, .. }));
    }

    #[test]
    fn validation_rejects_short_interval_and_bad_urls() {
        let mut config = Config::default();
        config.polling.check_interval_seconds = 1;
        assert!(config.validate().is_err());

        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.targets[0].url = "ftp://example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn display_hides_token() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let rendered = config.to_string();

        assert!(rendered.contains("Token: (set)"));
        assert!(!rendered.contains("123:abc"));
        assert!(rendered.contains("43: Khutorok"));
    }
}
