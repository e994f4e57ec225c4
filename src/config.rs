//! Run configuration
//!
//! Values come from command-line flags, an optional YAML file and the
//! environment. Flags win over the file; `${VAR}` placeholders in the file
//! are resolved from the environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::discord::MAX_PAGE_SIZE;
use crate::error::{Error, Result};
use crate::output::DEFAULT_OUTPUT_FILE;
use crate::scraper::ScrapeRequest;

/// Config file picked up from the working directory when `-c` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "msggrab.yml";
pub const DEFAULT_PAGE_SIZE: u8 = 20;
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_secs(1);

/// YAML config structure
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    #[serde(default, deserialize_with = "deserialize_channels")]
    channels: Option<Vec<String>>,
    #[serde(default, alias = "botToken")]
    bot_token: Option<String>,
    #[serde(default, alias = "amountPerLoop")]
    amount_per_loop: Option<u32>,
    #[serde(default, alias = "timeToWait", deserialize_with = "deserialize_duration")]
    time_to_wait: Option<Duration>,
    #[serde(default, alias = "outputFile")]
    output_file: Option<PathBuf>,
    #[serde(default)]
    retries: Option<u32>,
}

/// Channels may be a YAML list or a single comma-separated string.
fn deserialize_channels<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(split_channels(&s))),
        Some(serde_yaml::Value::Sequence(items)) => {
            let mut channels = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_yaml::Value::String(s) => channels.extend(split_channels(&s)),
                    serde_yaml::Value::Number(n) => channels.push(n.to_string()),
                    other => {
                        return Err(D::Error::custom(format!(
                            "expected channel id, got {:?}",
                            other
                        )))
                    }
                }
            }
            Ok(Some(channels))
        }
        Some(other) => Err(D::Error::custom(format!(
            "expected list or comma-separated string of channels, got {:?}",
            other
        ))),
    }
}

/// Durations may be a number of seconds or a string such as `500ms`, `2s`, `1m`.
fn deserialize_duration<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::Number(n)) => n
            .as_f64()
            .filter(|secs| *secs >= 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid duration: {}", n))),
        Some(serde_yaml::Value::String(s)) => {
            parse_duration(&s).map(Some).map_err(D::Error::custom)
        }
        Some(other) => Err(D::Error::custom(format!(
            "expected duration, got {:?}",
            other
        ))),
    }
}

/// Parse `"1"`, `"1.5"`, `"1s"`, `"250ms"` or `"2m"`.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let s = input.trim();
    let (number, unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, "ms")
    } else if let Some(n) = s.strip_suffix('s') {
        (n, "s")
    } else if let Some(n) = s.strip_suffix('m') {
        (n, "m")
    } else {
        (s, "s")
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {:?}", input))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid duration: {:?}", input));
    }
    let secs = match unit {
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        _ => value,
    };
    Duration::try_from_secs_f64(secs).map_err(|_| format!("invalid duration: {:?}", input))
}

/// Split a comma-separated channel list, dropping blanks.
pub fn split_channels(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Values given on the command line. `None`/empty means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub bot_token: Option<String>,
    pub channels: Vec<String>,
    pub output_file: Option<PathBuf>,
    pub page_size: Option<u32>,
    pub poll_delay: Option<Duration>,
    pub retries: Option<u32>,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub channels: Vec<String>,
    pub output_file: PathBuf,
    pub page_size: u8,
    pub poll_delay: Duration,
    pub retries: u32,
}

impl Config {
    /// Build the run configuration. An explicit config file must be readable;
    /// the default `msggrab.yml` is only used when present.
    pub fn load(overrides: Overrides) -> Result<Self> {
        let file = match &overrides.config_file {
            Some(path) => Some(Self::read_file(path)?),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Some(Self::read_file(DEFAULT_CONFIG_FILE)?)
            }
            None => None,
        };
        Self::merge(file.unwrap_or_default(), overrides)
    }

    /// Load configuration from a specific file, with no command-line overrides.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::merge(Self::read_file(path)?, Overrides::default())
    }

    fn read_file<P: AsRef<Path>>(path: P) -> Result<YamlConfig> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigFile(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let yaml: YamlConfig = serde_yaml::from_str(&content).map_err(|e| {
            Error::ConfigFile(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(yaml)
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>) -> Option<String> {
        let v = value?;
        if v.starts_with("${") && v.ends_with('}') {
            let var_name = &v[2..v.len() - 1];
            return std::env::var(var_name).ok();
        }
        Some(v)
    }

    fn merge(file: YamlConfig, overrides: Overrides) -> Result<Self> {
        let bot_token = overrides
            .bot_token
            .or_else(|| Self::resolve_env_string(file.bot_token))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(Error::MissingToken)?;

        // Command-line channels replace the file's list rather than extend it.
        let channels: Vec<String> = if overrides.channels.is_empty() {
            file.channels.unwrap_or_default()
        } else {
            overrides
                .channels
                .iter()
                .flat_map(|c| split_channels(c))
                .collect()
        };
        if channels.is_empty() {
            return Err(Error::NoChannels);
        }

        let page_size = overrides
            .page_size
            .or(file.amount_per_loop)
            .unwrap_or(DEFAULT_PAGE_SIZE as u32);
        let page_size = u8::try_from(page_size)
            .ok()
            .filter(|n| (1..=MAX_PAGE_SIZE).contains(n))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "amount per loop must be between 1 and {}, got {}",
                    MAX_PAGE_SIZE, page_size
                ))
            })?;

        Ok(Self {
            bot_token,
            channels,
            output_file: overrides
                .output_file
                .or(file.output_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILE)),
            page_size,
            poll_delay: overrides
                .poll_delay
                .or(file.time_to_wait)
                .unwrap_or(DEFAULT_POLL_DELAY),
            retries: overrides.retries.or(file.retries).unwrap_or(0),
        })
    }

    /// One request per configured channel, in configured order.
    pub fn scrape_requests(&self) -> Result<Vec<ScrapeRequest>> {
        self.channels
            .iter()
            .map(|channel| ScrapeRequest::new(channel.as_str(), self.page_size, self.poll_delay))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};
    use tempfile::NamedTempFile;

    static ENV_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn yaml_file(content: &str) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), content).unwrap();
        file
    }

    fn overrides_with_token() -> Overrides {
        Overrides {
            bot_token: Some("cli-token".to_string()),
            channels: vec!["1".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("1").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("1.5").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        assert!(parse_duration("1e30s").is_err());
        assert!(parse_duration("1e300m").is_err());
        assert!(parse_duration("inf").is_err());
    }

    #[test]
    fn test_split_channels() {
        assert_eq!(split_channels("1, 2,,3 "), vec!["1", "2", "3"]);
        assert!(split_channels(" , ").is_empty());
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::merge(YamlConfig::default(), overrides_with_token()).unwrap();

        assert_eq!(config.bot_token, "cli-token");
        assert_eq!(config.channels, vec!["1"]);
        assert_eq!(config.output_file, PathBuf::from(DEFAULT_OUTPUT_FILE));
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.poll_delay, DEFAULT_POLL_DELAY);
        assert_eq!(config.retries, 0);
    }

    #[test]
    fn test_missing_token_is_error() {
        let overrides = Overrides {
            channels: vec!["1".to_string()],
            bot_token: Some("   ".to_string()),
            ..Default::default()
        };

        let err = Config::merge(YamlConfig::default(), overrides).unwrap_err();
        assert!(matches!(err, Error::MissingToken));
    }

    #[test]
    fn test_no_channels_is_error() {
        let overrides = Overrides {
            bot_token: Some("t".to_string()),
            channels: vec![" , ".to_string()],
            ..Default::default()
        };

        let err = Config::merge(YamlConfig::default(), overrides).unwrap_err();
        assert!(matches!(err, Error::NoChannels));
    }

    #[test]
    fn test_page_size_bounds() {
        for bad in [0u32, 101, 1000] {
            let overrides = Overrides {
                page_size: Some(bad),
                ..overrides_with_token()
            };
            let err = Config::merge(YamlConfig::default(), overrides).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{bad}");
        }
    }

    #[test]
    fn test_cli_channels_are_split_and_replace_file_channels() {
        let file = yaml_file("channels: [\"10\", \"20\"]\nbot_token: file-token\n");
        let overrides = Overrides {
            config_file: Some(file.path().to_path_buf()),
            channels: vec!["1,2".to_string(), "3".to_string()],
            ..Default::default()
        };

        let config = Config::load(overrides).unwrap();

        assert_eq!(config.channels, vec!["1", "2", "3"]);
        assert_eq!(config.bot_token, "file-token");
    }

    #[test]
    fn test_load_from_yaml_with_camel_case_keys() {
        let file = yaml_file(
            r#"
channels:
  - "123456789012345678"
  - 223456789012345678
botToken: "abc.def"
amountPerLoop: 50
timeToWait: 500ms
outputFile: memes.log
"#,
        );

        let config = Config::load_from_file(file.path()).unwrap();

        assert_eq!(
            config.channels,
            vec!["123456789012345678", "223456789012345678"]
        );
        assert_eq!(config.bot_token, "abc.def");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.poll_delay, Duration::from_millis(500));
        assert_eq!(config.output_file, PathBuf::from("memes.log"));
    }

    #[test]
    fn test_load_from_yaml_with_snake_case_and_string_channels() {
        let file = yaml_file(
            r#"
channels: "1, 2"
bot_token: "t"
amount_per_loop: 100
time_to_wait: 2
retries: 3
"#,
        );

        let config = Config::load_from_file(file.path()).unwrap();

        assert_eq!(config.channels, vec!["1", "2"]);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.poll_delay, Duration::from_secs(2));
        assert_eq!(config.retries, 3);
    }

    #[test]
    fn test_cli_values_override_file() {
        let file = yaml_file("channels: [\"1\"]\nbot_token: t\namountPerLoop: 50\ntimeToWait: 3\n");
        let overrides = Overrides {
            config_file: Some(file.path().to_path_buf()),
            page_size: Some(10),
            poll_delay: Some(Duration::from_millis(100)),
            output_file: Some(PathBuf::from("cli.log")),
            ..Default::default()
        };

        let config = Config::load(overrides).unwrap();

        assert_eq!(config.page_size, 10);
        assert_eq!(config.poll_delay, Duration::from_millis(100));
        assert_eq!(config.output_file, PathBuf::from("cli.log"));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let file = yaml_file("channels: {broken: [\n");
        let err = Config::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigFile(_)));
    }

    #[test]
    fn test_invalid_duration_in_file_is_config_error() {
        let file = yaml_file("channels: [\"1\"]\nbot_token: t\ntimeToWait: forever\n");
        let err = Config::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigFile(_)));
    }

    #[test]
    fn test_huge_duration_in_file_is_config_error() {
        let file = yaml_file("channels: [\"1\"]\nbot_token: t\ntimeToWait: 1e300\n");
        let err = Config::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigFile(_)));

        let file = yaml_file("channels: [\"1\"]\nbot_token: t\ntimeToWait: \"1e30s\"\n");
        let err = Config::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigFile(_)));
    }

    #[test]
    fn test_explicit_missing_file_is_config_error() {
        let overrides = Overrides {
            config_file: Some(PathBuf::from("/definitely/not/here/msggrab.yml")),
            ..overrides_with_token()
        };
        let err = Config::load(overrides).unwrap_err();
        assert!(matches!(err, Error::ConfigFile(_)));
    }

    #[test]
    fn env_placeholder_token_is_resolved() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::set_var("MSGGRAB_TEST_TOKEN", "from-env");
        let file = yaml_file("channels: [\"1\"]\nbot_token: \"${MSGGRAB_TEST_TOKEN}\"\n");

        let config = Config::load_from_file(file.path()).unwrap();
        std::env::remove_var("MSGGRAB_TEST_TOKEN");

        assert_eq!(config.bot_token, "from-env");
    }

    #[test]
    fn unset_env_placeholder_means_missing_token() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::remove_var("MSGGRAB_TEST_UNSET");
        let file = yaml_file("channels: [\"1\"]\nbot_token: \"${MSGGRAB_TEST_UNSET}\"\n");

        let err = Config::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::MissingToken));
    }

    #[test]
    fn test_scrape_requests_follow_channel_order() {
        let overrides = Overrides {
            channels: vec!["20,10,30".to_string()],
            page_size: Some(5),
            ..overrides_with_token()
        };
        let config = Config::merge(YamlConfig::default(), overrides).unwrap();

        let requests = config.scrape_requests().unwrap();
        let ids: Vec<&str> = requests.iter().map(|r| r.channel_id.as_str()).collect();
        assert_eq!(ids, vec!["20", "10", "30"]);
        assert!(requests.iter().all(|r| r.page_size == 5));
    }

    #[test]
    fn test_non_numeric_channel_is_rejected_before_scraping() {
        let overrides = Overrides {
            channels: vec!["1/../../users/@me".to_string()],
            ..overrides_with_token()
        };
        let config = Config::merge(YamlConfig::default(), overrides).unwrap();

        assert!(matches!(
            config.scrape_requests(),
            Err(Error::InvalidArgument(_))
        ));
    }
}
