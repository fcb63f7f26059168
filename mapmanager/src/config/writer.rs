//! INI serialization: [`ConfigFile`] → commented `config.ini` text.

use super::file::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let root = config
        .storage
        .root
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    format!(
        r#"[storage]
; Directory holding downloaded map data (must exist and be writable)
root = {}

[features]
; Install address-parser models for requested territories
address_search = {}

[distribution]
; Distribution point queried for url.json
url = {}

[download]
; Seconds without data before a download is abandoned
timeout = {}
"#,
        root, config.features.address_search, config.distribution.url, config.download.timeout
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_writes_all_sections() {
        let mut config = ConfigFile::default();
        config.storage.root = Some(PathBuf::from("/srv/maps"));

        let text = to_config_string(&config);
        assert!(text.contains("[storage]\n"));
        assert!(text.contains("root = /srv/maps\n"));
        assert!(text.contains("address_search = true\n"));
        assert!(text.contains("[download]\n"));
    }
}
