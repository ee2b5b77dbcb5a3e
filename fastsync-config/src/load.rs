use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator for nested configuration keys in environment variables.
///
/// Example: `APP_TARGET__S3_BUCKET` sets the `s3_bucket` field of the target config.
const ENV_SEPARATOR: &str = "__";

/// Separator for list elements in environment variables.
///
/// Example: `APP_TARGET__DEFAULT_TARGET_SCHEMA_SELECT_PERMISSIONS=reader,analyst`.
const LIST_SEPARATOR: &str = ",";

/// Trait defining the keys that should be parsed as lists when they come from environment
/// variables.
pub trait Config {
    /// Environment scope of this config, `TAP` reads `APP_TAP__*` overrides.
    const ENV_SCOPE: &'static str;

    /// Keys that are split on `,` when provided through the environment.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors raised while reading plain JSON data files.
#[derive(Debug, Error)]
pub enum JsonFileError {
    #[error("failed to open `{path}`: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse `{path}`: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Loads a JSON configuration file and applies environment variable overrides.
///
/// Values are loaded in this order:
/// 1. The JSON file at `path`.
/// 2. Environment variables prefixed with `APP_{ENV_SCOPE}__`.
///
/// Nested keys use double underscores, `APP_TAP__PASSWORD` overrides `password` of the tap
/// config. Keys in [`Config::LIST_PARSE_KEYS`] are split on `,`.
pub fn load_config_file<T>(path: impl AsRef<Path>) -> Result<T, config::ConfigError>
where
    T: Config + DeserializeOwned,
{
    let prefix = format!("{ENV_PREFIX}_{}", T::ENV_SCOPE);

    let mut environment_source = config::Environment::with_prefix(&prefix)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    if !T::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source.list_separator(LIST_SEPARATOR);

        for key in T::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let settings = config::Config::builder()
        .add_source(
            config::File::from(path.as_ref())
                .format(config::FileFormat::Json)
                .required(true),
        )
        .add_source(environment_source)
        .build()?;

    settings.try_deserialize::<T>()
}

/// Reads a plain JSON document such as a catalog, transformation or state file.
///
/// These files are data rather than settings, so they are parsed verbatim without
/// environment overrides or key normalization.
pub fn load_json_file<T>(path: impl AsRef<Path>) -> Result<T, JsonFileError>
where
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| JsonFileError::Open {
        path: path.display().to_string(),
        source,
    })?;

    serde_json::from_reader(BufReader::new(file)).map_err(|source| JsonFileError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        host: String,
        port: u16,
    }

    impl Config for Sample {
        const ENV_SCOPE: &'static str = "SAMPLE_LOAD_TEST";
        const LIST_PARSE_KEYS: &'static [&'static str] = &[];
    }

    #[test]
    fn test_load_config_file_reads_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"host": "localhost", "port": 5432}}"#).unwrap();

        let sample: Sample = load_config_file(file.path()).unwrap();

        assert_eq!(sample.host, "localhost");
        assert_eq!(sample.port, 5432);
    }

    #[test]
    fn test_load_json_file_reports_path() {
        let err = load_json_file::<serde_json::Value>("/does/not/exist.json").unwrap_err();

        assert!(err.to_string().contains("/does/not/exist.json"));
    }
}
