use std::path::{Path, PathBuf};

use configparser::ini::Ini;

const DEFAULT_CACHE_AGE_SECS: u64 = 24 * 60 * 60;

/// Persisted configuration consumed by the refresh and download families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Acceptable metadata cache age in seconds before a refresh re-fetches.
    pub cache_age_secs: u64,
    /// Whether refresh and download may run on a metered connection.
    pub refresh_on_metered: bool,
    /// Locale used for language-pack lookups, e.g. "ja_JP".
    pub locale: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_age_secs: DEFAULT_CACHE_AGE_SECS,
            refresh_on_metered: false,
            locale: default_locale(),
        }
    }
}

fn default_locale() -> String {
    std::env::var("LANG")
        .ok()
        .and_then(|lang| {
            let trimmed = lang.split('.').next().unwrap_or("").trim().to_string();
            if trimmed.is_empty() || trimmed == "C" || trimmed == "POSIX" {
                None
            } else {
                Some(trimmed)
            }
        })
        .unwrap_or_else(|| "en_US".to_string())
}

impl Settings {
    /// Well-known settings path, e.g. ~/.config/appdepot/settings.ini.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("appdepot").join("settings.ini"))
    }

    /// Load settings from the default location, falling back to defaults if
    /// the file does not exist.
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    /// Load settings from an explicit INI file. Missing keys keep their
    /// defaults; a malformed file is an error.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let mut config = Ini::new();
        config.load(path)?;

        let mut settings = Settings::default();
        if let Ok(Some(age)) = config.getuint("general", "cache-age") {
            settings.cache_age_secs = age;
        }
        if let Ok(Some(metered)) = config.getbool("general", "refresh-on-metered") {
            settings.refresh_on_metered = metered;
        }
        if let Some(locale) = config.get("general", "locale") {
            let locale = locale.trim().to_string();
            if !locale.is_empty() {
                settings.locale = locale;
            }
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_settings(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_file() {
        let file = write_settings(
            "[general]\ncache-age = 3600\nrefresh-on-metered = true\nlocale = ja_JP\n",
        );
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.cache_age_secs, 3600);
        assert!(settings.refresh_on_metered);
        assert_eq!(settings.locale, "ja_JP");
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let file = write_settings("[general]\ncache-age = 60\n");
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.cache_age_secs, 60);
        assert!(!settings.refresh_on_metered);
        assert!(!settings.locale.is_empty());
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let file = write_settings("");
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.cache_age_secs, DEFAULT_CACHE_AGE_SECS);
    }
}
