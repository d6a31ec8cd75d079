use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub import: ImportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Database product selector; dispatched in `storage::open_storage`.
    #[serde(default = "default_product")]
    pub product: String,
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Elevated role used only when the target database must be created.
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    #[serde(default)]
    pub admin_password: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Language code, interpolated into the `words_<lang>` and
    /// `time_<lang>` table names. Validated at load time.
    pub lang: String,
    pub source_dir: PathBuf,
}

fn default_product() -> String {
    "postgresql".to_string()
}
fn default_db_name() -> String {
    "opensubtitle".to_string()
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5432
}
fn default_admin_user() -> String {
    "postgres".to_string()
}

/// Returns true when `code` is safe to interpolate into a table name:
/// lowercase ASCII letters, digits, and underscores, starting with a
/// letter, at most 16 bytes.
pub fn is_valid_lang(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= 16
        && code.starts_with(|c: char| c.is_ascii_lowercase())
        && code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.database.product.is_empty() {
        anyhow::bail!("database.product must not be empty");
    }
    if !is_valid_lang(&config.import.lang) {
        anyhow::bail!(
            "import.lang {:?} is not a valid language code (expected lowercase \
             letters, digits, or '_', starting with a letter)",
            config.import.lang
        );
    }
    // The database name is interpolated into CREATE DATABASE, so it is held
    // to the same identifier rules as the language code.
    let name = &config.database.name;
    if name.is_empty()
        || !name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        anyhow::bail!("database.name {:?} is not a valid identifier", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let config = parse(
            r#"
            [database]

            [import]
            lang = "en"
            source_dir = "/data/subs"
            "#,
        )
        .unwrap();
        assert_eq!(config.database.product, "postgresql");
        assert_eq!(config.database.name, "opensubtitle");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.admin_user, "postgres");
        assert_eq!(config.import.lang, "en");
    }

    #[test]
    fn rejects_language_codes_unsafe_for_identifiers() {
        for lang in ["", "EN", "en-us", "en;drop", "1en", "averyverylonglangcode"] {
            let result = parse(&format!(
                r#"
                [database]

                [import]
                lang = "{}"
                source_dir = "/data/subs"
                "#,
                lang
            ));
            assert!(result.is_err(), "lang {:?} should be rejected", lang);
        }
        assert!(is_valid_lang("zh_tw"));
        assert!(is_valid_lang("pt_br"));
    }

    #[test]
    fn rejects_database_names_unsafe_for_identifiers() {
        let result = parse(
            r#"
            [database]
            name = "open;subtitle"

            [import]
            lang = "en"
            source_dir = "/data/subs"
            "#,
        );
        assert!(result.is_err());
    }
}
