//! INI parsing: `Ini` → [`ConfigFile`].
//!
//! The single place where INI key names are mapped to struct fields.
//! Unknown sections and keys are ignored.

use std::path::PathBuf;

use ini::Ini;

use super::file::{ConfigFile, ConfigFileError};

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [storage] section
    if let Some(section) = ini.section(Some("storage")) {
        if let Some(v) = section.get("root") {
            let v = v.trim();
            if !v.is_empty() {
                config.storage.root = Some(expand_tilde(v));
            }
        }
    }

    // [features] section
    if let Some(section) = ini.section(Some("features")) {
        if let Some(v) = section.get("address_search") {
            config.features.address_search = parse_bool(v).ok_or_else(|| invalid(
                "features",
                "address_search",
                v,
                "must be true or false",
            ))?;
        }
    }

    // [distribution] section
    if let Some(section) = ini.section(Some("distribution")) {
        if let Some(v) = section.get("url") {
            let v = v.trim();
            if !(v.starts_with("http://") || v.starts_with("https://")) {
                return Err(invalid("distribution", "url", v, "must be an http(s) URL"));
            }
            config.distribution.url = v.trim_end_matches('/').to_string();
        }
    }

    // [download] section
    if let Some(section) = ini.section(Some("download")) {
        if let Some(v) = section.get("timeout") {
            let timeout: u64 = v
                .trim()
                .parse()
                .map_err(|_| invalid("download", "timeout", v, "must be a positive number of seconds"))?;
            if timeout == 0 {
                return Err(invalid("download", "timeout", v, "must be a positive number of seconds"));
            }
            config.download.timeout = timeout;
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
