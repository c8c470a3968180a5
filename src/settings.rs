use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_VIDEO_MODEL: &str = "veo-3.1-generate-preview";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub gemini_api_key: Option<String>,
    pub analysis_model: Option<String>,
    pub video_model: Option<String>,
    /// Seconds between status polls while a video job runs. No upper bound on
    /// the number of polls is imposed; genuinely long jobs are expected.
    pub poll_interval_secs: Option<u64>,
}

impl Settings {
    pub fn analysis_model(&self) -> &str {
        self.analysis_model.as_deref().unwrap_or(DEFAULT_ANALYSIS_MODEL)
    }

    pub fn video_model(&self) -> &str {
        self.video_model.as_deref().unwrap_or(DEFAULT_VIDEO_MODEL)
    }

    pub fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
    }

    /// Resolve the credential: settings first, environment second.
    pub fn api_key(&self) -> Option<String> {
        self.gemini_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

pub fn load_settings_from_dir(data_dir: &Path) -> Settings {
    let path = settings_path(data_dir);
    if let Ok(bytes) = fs::read(&path) {
        if let Ok(s) = serde_json::from_slice::<Settings>(&bytes) {
            return s;
        }
    }
    Settings::default()
}

pub fn save_settings_to_dir(data_dir: &Path, s: &Settings) -> Result<()> {
    let path = settings_path(data_dir);
    let json = serde_json::to_vec_pretty(s)?;
    fs::write(path, json).context("write settings")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let s = Settings::default();
        assert_eq!(s.analysis_model(), DEFAULT_ANALYSIS_MODEL);
        assert_eq!(s.video_model(), DEFAULT_VIDEO_MODEL);
        assert_eq!(s.poll_interval_secs(), 10);
    }

    #[test]
    fn settings_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings {
            gemini_api_key: Some("k".into()),
            poll_interval_secs: Some(5),
            ..Default::default()
        };
        save_settings_to_dir(dir.path(), &s).unwrap();
        let loaded = load_settings_from_dir(dir.path());
        assert_eq!(loaded.gemini_api_key.as_deref(), Some("k"));
        assert_eq!(loaded.poll_interval_secs(), 5);
    }

    #[test]
    fn missing_or_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_settings_from_dir(dir.path());
        assert!(loaded.gemini_api_key.is_none());
        fs::write(settings_path(dir.path()), b"not json").unwrap();
        let loaded = load_settings_from_dir(dir.path());
        assert!(loaded.gemini_api_key.is_none());
    }
}
