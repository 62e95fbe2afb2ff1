use color_eyre::{Report, Result};
use serde::{Deserialize, Serialize};
use std::env::var;
use std::path::{Path, PathBuf};
use crate::models::article::SLUG_COLUMN_WIDTH;
use techblog_core::{ImageFormat, UploadLimits};

pub const DEFAULT_SLUG_MAX_LENGTH: usize = SLUG_COLUMN_WIDTH;
pub const DEFAULT_SLUG_WRITE_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub database_url: Option<String>,
    pub media_root: PathBuf,
    pub publishing: PublishingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    pub slug_max_length: usize,
    pub slug_write_attempts: u32,
    pub upload: UploadLimits,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        PublishingConfig {
            slug_max_length: DEFAULT_SLUG_MAX_LENGTH,
            slug_write_attempts: DEFAULT_SLUG_WRITE_ATTEMPTS,
            upload: UploadLimits::default(),
        }
    }
}

impl PublishingConfig {
    pub fn from_toml(source: &str) -> Result<PublishingConfig> {
        let config = toml::from_str::<PublishingConfig>(source)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.slug_write_attempts == 0 {
            return Err(Report::msg("slug_write_attempts must be at least 1"));
        }
        if self.slug_max_length == 0 || self.slug_max_length > SLUG_COLUMN_WIDTH {
            return Err(Report::msg(format!(
                "slug_max_length must be between 1 and {SLUG_COLUMN_WIDTH}, got {}",
                self.slug_max_length
            )));
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<PublishingConfig> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(max_bytes) = lookup("UPLOAD_MAX_BYTES") {
            self.upload.max_bytes = max_bytes.trim().parse::<u64>()?;
        }
        if let Some(max_pixels) = lookup("UPLOAD_MAX_PIXELS") {
            self.upload.max_pixels = max_pixels.trim().parse::<u64>()?;
        }
        if let Some(formats) = lookup("UPLOAD_ALLOWED_FORMATS") {
            self.upload.allowed_formats = formats
                .split(',')
                .filter(|f| !f.trim().is_empty())
                .map(str::parse::<ImageFormat>)
                .collect::<Result<_, _>>()?;
        }
        self.check()
    }
}

impl Config {
    pub fn new() -> Result<Config> {
        Self::from_lookup(|key| var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
        let database_url = lookup("DATABASE_URL");
        let media_root = lookup("MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("media"));

        let mut publishing = match lookup("TECHBLOG_CONFIG") {
            Some(path) => PublishingConfig::load(path)?,
            None => PublishingConfig::default(),
        };
        publishing.apply_env(&lookup)?;

        Ok(Config {
            database_url,
            media_root,
            publishing,
        })
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| Report::msg("DATABASE_URL is not set"))
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn publishing(&self) -> &PublishingConfig {
        &self.publishing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.media_root(), Path::new("media"));
        assert!(config.database_url().is_err());
        assert_eq!(config.publishing(), &PublishingConfig::default());
    }

    #[test]
    fn environment_overrides_upload_limits() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("UPLOAD_MAX_BYTES", "1024"),
            ("UPLOAD_MAX_PIXELS", "4096"),
            ("UPLOAD_ALLOWED_FORMATS", "png, jpg"),
        ]))
        .unwrap();
        let upload = &config.publishing().upload;
        assert_eq!(config.database_url().unwrap(), "sqlite::memory:");
        assert_eq!(upload.max_bytes, 1024);
        assert_eq!(upload.max_pixels, 4096);
        assert_eq!(upload.allowed_formats_display(), "JPEG, PNG");
    }

    #[test]
    fn bad_format_in_environment_is_an_error() {
        assert!(Config::from_lookup(lookup(&[("UPLOAD_ALLOWED_FORMATS", "svg")])).is_err());
        // sniffable but never decodable in this build
        assert!(Config::from_lookup(lookup(&[("UPLOAD_ALLOWED_FORMATS", "png,avif")])).is_err());
        assert!(PublishingConfig::from_toml("[upload]\nallowed_formats = [\"avif\"]").is_err());
    }

    #[test]
    fn tiff_and_ico_can_be_enabled() {
        let config = PublishingConfig::from_toml("[upload]\nallowed_formats = [\"tif\", \"ico\"]").unwrap();
        assert_eq!(config.upload.allowed_formats, std::collections::BTreeSet::from([ImageFormat::Tiff, ImageFormat::Ico]));
    }

    #[test]
    fn slug_bound_must_fit_the_column() {
        let err = PublishingConfig::from_toml("slug_max_length = 80").unwrap_err();
        assert!(err.to_string().contains("between 1 and 50"), "{err}");
        assert!(PublishingConfig::from_toml("slug_max_length = 0").is_err());
        assert!(PublishingConfig::from_toml("slug_write_attempts = 0").is_err());
        assert_eq!(PublishingConfig::from_toml("slug_max_length = 50").unwrap().slug_max_length, 50);
    }

    #[test]
    fn toml_file_fills_missing_fields_with_defaults() {
        let config = PublishingConfig::from_toml(
            r#"
            slug_max_length = 40

            [upload]
            allowed_formats = ["png", "webp"]
            "#,
        )
        .unwrap();
        assert_eq!(config.slug_max_length, 40);
        assert_eq!(config.slug_write_attempts, DEFAULT_SLUG_WRITE_ATTEMPTS);
        assert_eq!(config.upload.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.upload.allowed_formats_display(), "PNG, WEBP");
    }
}
