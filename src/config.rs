use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "schoold.toml";

fn default_id_prefix() -> String {
    "SEC".to_string()
}

fn default_capacity() -> i64 {
    29
}

fn default_photo_url_prefix() -> String {
    "/uploads/photos".to_string()
}

/// Per-workspace school settings read from `schoold.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchoolConfig {
    /// Prefix of admission numbers (`SEC/<year>/<seq>`) and receipts (`SEC-<year>-<seq>`).
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
    /// Capacity given to grades created without an explicit `maxCapacityPerClass`.
    #[serde(default = "default_capacity")]
    pub default_capacity: i64,
    /// Static-serving prefix that student photo paths are rooted at.
    #[serde(default = "default_photo_url_prefix")]
    pub photo_url_prefix: String,
}

impl Default for SchoolConfig {
    fn default() -> Self {
        Self {
            id_prefix: default_id_prefix(),
            default_capacity: default_capacity(),
            photo_url_prefix: default_photo_url_prefix(),
        }
    }
}

impl SchoolConfig {
    pub fn load(workspace: &Path) -> anyhow::Result<Self> {
        let path = workspace.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
        let cfg: SchoolConfig = toml::from_str(&text)
            .with_context(|| format!("invalid config {}", path.to_string_lossy()))?;
        if cfg.id_prefix.trim().is_empty() {
            anyhow::bail!("id_prefix must not be empty");
        }
        if cfg.default_capacity <= 0 {
            anyhow::bail!("default_capacity must be positive");
        }
        Ok(cfg)
    }

    /// Roots an uploaded photo at the configured prefix: `<prefix>/<file name>`.
    ///
    /// The upload layer may hand over a bare file name, an absolute filesystem path or an
    /// already-prefixed URL path; all of them reduce to the same stored form.
    pub fn photo_path(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        let file_name = trimmed
            .rsplit(['/', '\\'])
            .find(|seg| !seg.is_empty())?;
        let prefix = self.photo_url_prefix.trim_end_matches('/');
        Some(format!("{}/{}", prefix, file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn photo_paths_share_one_convention() {
        let cfg = SchoolConfig::default();
        assert_eq!(
            cfg.photo_path("photo-123.jpg").as_deref(),
            Some("/uploads/photos/photo-123.jpg")
        );
        assert_eq!(
            cfg.photo_path("/var/app/uploads/photos/photo-123.jpg").as_deref(),
            Some("/uploads/photos/photo-123.jpg")
        );
        assert_eq!(
            cfg.photo_path("/uploads/photos/photo-123.jpg").as_deref(),
            Some("/uploads/photos/photo-123.jpg")
        );
        assert_eq!(
            cfg.photo_path("C:\\uploads\\staff.png").as_deref(),
            Some("/uploads/photos/staff.png")
        );
        assert_eq!(cfg.photo_path("  "), None);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = std::env::temp_dir().join(format!("schoold-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create dir");
        let cfg = SchoolConfig::load(&dir).expect("load");
        assert_eq!(cfg.id_prefix, "SEC");
        assert_eq!(cfg.default_capacity, 29);

        std::fs::write(dir.join(CONFIG_FILE_NAME), "default_capacity = 24\n").expect("write");
        let cfg = SchoolConfig::load(&dir).expect("load");
        assert_eq!(cfg.default_capacity, 24);
        assert_eq!(cfg.photo_url_prefix, "/uploads/photos");

        let _ = std::fs::remove_dir_all(dir);
    }
}
