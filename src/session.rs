use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::utils::now_iso;

/// A file materialized under the app data dir so the webview can render it
/// over the asset protocol, the desktop counterpart of a browser object URL.
///
/// Ownership contract: every handle created must be released exactly once, by
/// the transition that supersedes or discards it. Release is by move; there is
/// no automatic reclamation on drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayHandle {
    pub path: PathBuf,
}

impl DisplayHandle {
    /// Copy an existing file (the chosen photo) into `dir` under a fresh name.
    pub fn from_copy(dir: &Path, src: &Path, extension: &str) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.{extension}", Uuid::new_v4()));
        fs::copy(src, &path)?;
        Ok(Self { path })
    }

    /// Write generated bytes (the finished video) into `dir`.
    pub fn from_bytes(dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        fs::write(&path, bytes)?;
        Ok(Self { path })
    }

    /// Delete the backing file. A failed delete is a leak, not a fatal error.
    pub fn release(self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release display handle");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Upload,
    PromptReview,
    Generating,
    Result,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedImage {
    pub path: PathBuf,
    pub mime_type: String,
    pub size_bytes: u64,
    pub preview: DisplayHandle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedVideo {
    pub size_bytes: u64,
    pub handle: DisplayHandle,
}

/// The complete state of one wizard run. One per webview, held in memory
/// only, mutated exclusively through the transition methods below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub phase: Phase,
    pub image: Option<SelectedImage>,
    pub prompt: String,
    pub progress: String,
    pub video: Option<GeneratedVideo>,
    pub error: Option<String>,
    pub updated_at: String,
}

impl Session {
    pub fn new(id: String) -> Self {
        Self {
            id,
            phase: Phase::Upload,
            image: None,
            prompt: String::new(),
            progress: String::new(),
            video: None,
            error: None,
            updated_at: now_iso(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = now_iso();
    }

    /// Replace the current selection. Any earlier preview handle is released
    /// exactly once, here. On a rejected selection the incoming preview is
    /// released too, since no owner remains for it.
    pub fn select_image(&mut self, image: SelectedImage) -> Result<(), String> {
        if self.phase != Phase::Upload {
            image.preview.release();
            return Err("an image can only be selected on the upload step".to_string());
        }
        if let Some(old) = self.image.take() {
            old.preview.release();
        }
        self.image = Some(image);
        self.error = None;
        self.touch();
        Ok(())
    }

    pub fn clear_image(&mut self) -> Result<(), String> {
        if self.phase != Phase::Upload {
            return Err("the image can only be cleared on the upload step".to_string());
        }
        if let Some(old) = self.image.take() {
            old.preview.release();
        }
        self.prompt.clear();
        self.error = None;
        self.touch();
        Ok(())
    }

    /// Upload -> PromptReview on a successful analysis.
    pub fn apply_analysis(&mut self, description: String) -> Result<(), String> {
        if self.phase != Phase::Upload {
            return Err("analysis applies only on the upload step".to_string());
        }
        if self.image.is_none() {
            return Err("no image selected".to_string());
        }
        self.prompt = description;
        self.phase = Phase::PromptReview;
        self.error = None;
        self.touch();
        Ok(())
    }

    /// Surface an error without moving the wizard: a failed analysis or a
    /// missing credential keeps the current step and any earlier prompt text.
    pub fn set_error(&mut self, message: String) {
        self.error = Some(message);
        self.touch();
    }

    pub fn set_prompt(&mut self, text: String) -> Result<(), String> {
        if self.phase != Phase::PromptReview {
            return Err("the prompt is only editable on the review step".to_string());
        }
        self.prompt = text;
        self.touch();
        Ok(())
    }

    /// PromptReview -> Generating. The phase guard is what keeps a second
    /// outbound call from ever racing the running one.
    pub fn begin_generation(&mut self) -> Result<(), String> {
        if self.phase != Phase::PromptReview {
            return Err("generation starts from the review step".to_string());
        }
        if self.image.is_none() {
            return Err("no image selected".to_string());
        }
        if self.prompt.trim().is_empty() {
            return Err("the walkthrough prompt is empty".to_string());
        }
        self.phase = Phase::Generating;
        self.progress = "Starting...".to_string();
        self.error = None;
        self.touch();
        Ok(())
    }

    pub fn set_progress(&mut self, message: &str) {
        if self.phase == Phase::Generating {
            self.progress = message.to_string();
            self.touch();
        }
    }

    /// Generating -> Result. A completion arriving after the session already
    /// left Generating (a cancelled run finishing anyway) is discarded.
    pub fn complete_generation(&mut self, video: GeneratedVideo) {
        if self.phase != Phase::Generating {
            video.handle.release();
            return;
        }
        if let Some(old) = self.video.take() {
            old.handle.release();
        }
        self.video = Some(video);
        self.phase = Phase::Result;
        self.progress.clear();
        self.error = None;
        self.touch();
    }

    /// Generating -> PromptReview, backward, so the user can retry with the
    /// same or an edited prompt without re-uploading or re-analyzing.
    pub fn fail_generation(&mut self, message: String) {
        self.phase = Phase::PromptReview;
        self.progress.clear();
        self.error = Some(message);
        self.touch();
    }

    /// PromptReview -> Upload, discarding the description text.
    pub fn back_to_upload(&mut self) -> Result<(), String> {
        if self.phase != Phase::PromptReview {
            return Err("back is only available on the review step".to_string());
        }
        self.phase = Phase::Upload;
        self.prompt.clear();
        self.touch();
        Ok(())
    }

    /// Result -> Upload. Releases both handles and restores the initial state.
    pub fn reset(&mut self) {
        if let Some(image) = self.image.take() {
            image.preview.release();
        }
        if let Some(video) = self.video.take() {
            video.handle.release();
        }
        self.phase = Phase::Upload;
        self.prompt.clear();
        self.progress.clear();
        self.error = None;
        self.touch();
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
        self.touch();
    }

    /// Release everything the session still owns. Used on session destroy.
    pub fn release_all(&mut self) {
        if let Some(image) = self.image.take() {
            image.preview.release();
        }
        if let Some(video) = self.video.take() {
            video.handle.release();
        }
    }
}
