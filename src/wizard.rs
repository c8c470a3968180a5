use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::gemini::ImageAnalyzer;
use crate::media;
use crate::session::{DisplayHandle, GeneratedVideo, Phase, Session};
use crate::utils::export_file_name;
use crate::veo::{run_generation, VideoOperations};

pub type SessionMap = Arc<DashMap<String, Session>>;
pub type JobMap = Arc<DashMap<String, JoinHandle<()>>>;

/// Encode the selected photo and run the analysis call, then route the
/// outcome into the session: success advances to prompt review, failure stays
/// on upload with the error surfaced. Returns a snapshot for the frontend.
pub async fn analyze(
    analyzer: &dyn ImageAnalyzer,
    sessions: &DashMap<String, Session>,
    session_id: &str,
) -> Result<Session, String> {
    let image_path = {
        let session = sessions
            .get(session_id)
            .ok_or_else(|| "session not found".to_string())?;
        if session.phase != Phase::Upload {
            return Err("analysis only runs on the upload step".to_string());
        }
        match &session.image {
            Some(image) => image.path.clone(),
            None => return Err("no image selected".to_string()),
        }
    };

    let outcome = match media::encode_image(&image_path).await {
        Ok(payload) => analyzer.analyze(&payload).await,
        Err(e) => Err(e),
    };

    let mut session = sessions
        .get_mut(session_id)
        .ok_or_else(|| "session not found".to_string())?;
    match outcome {
        Ok(description) => {
            info!(session_id, chars = description.len(), "image analysis complete");
            session.apply_analysis(description)?;
        }
        Err(e) => {
            error!(session_id, error = %e, "image analysis failed");
            session.set_error(e.user_message());
        }
    }
    Ok(session.clone())
}

/// Move the session into `Generating` and spawn the job that drives the
/// submit/poll/download protocol, mirroring every progress message into the
/// session. The terminal transition goes to `Result` on success and back to
/// `PromptReview` on any failure; either way the job removes its own entry
/// from the job map when it finishes.
#[instrument(skip(ops, sessions, jobs, videos_dir), fields(session_id = %session_id))]
pub fn spawn_generation(
    ops: Arc<dyn VideoOperations>,
    sessions: SessionMap,
    jobs: JobMap,
    session_id: String,
    poll_interval: Duration,
    videos_dir: PathBuf,
) -> Result<JoinHandle<()>, String> {
    let (image_path, prompt) = {
        let mut session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| "session not found".to_string())?;
        session.begin_generation()?;
        let image = session.image.as_ref().ok_or_else(|| "no image selected".to_string())?;
        (image.path.clone(), session.prompt.clone())
    };

    info!("video generation job starting");
    let handle = tokio::spawn(async move {
        run_job(ops, &sessions, &session_id, image_path, prompt, poll_interval, videos_dir).await;
        jobs.remove(&session_id);
    });
    Ok(handle)
}

async fn run_job(
    ops: Arc<dyn VideoOperations>,
    sessions: &DashMap<String, Session>,
    session_id: &str,
    image_path: PathBuf,
    prompt: String,
    poll_interval: Duration,
    videos_dir: PathBuf,
) {
    let payload = match media::encode_image(&image_path).await {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "image re-encode failed");
            route_failure(sessions, session_id, e.user_message());
            return;
        }
    };

    let result = run_generation(
        ops.as_ref(),
        &payload,
        &prompt,
        poll_interval,
        |message| {
            if let Some(mut session) = sessions.get_mut(session_id) {
                session.set_progress(message);
            }
        },
    )
    .await;

    match result {
        Ok(bytes) => {
            let file_name = format!("{session_id}-walkthrough.mp4");
            match DisplayHandle::from_bytes(&videos_dir, &file_name, &bytes) {
                Ok(handle) => {
                    info!(bytes = bytes.len(), "walkthrough video stored");
                    if let Some(mut session) = sessions.get_mut(session_id) {
                        session.complete_generation(GeneratedVideo {
                            size_bytes: bytes.len() as u64,
                            handle,
                        });
                    }
                }
                Err(e) => {
                    error!(error = %e, "could not store generated video");
                    route_failure(
                        sessions,
                        session_id,
                        format!("could not store generated video: {e}"),
                    );
                }
            }
        }
        Err(e) => {
            error!(error = %e, "video generation failed");
            route_failure(sessions, session_id, e.user_message());
        }
    }
}

fn route_failure(sessions: &DashMap<String, Session>, session_id: &str, message: String) {
    if let Some(mut session) = sessions.get_mut(session_id) {
        session.fail_generation(message);
    }
}

/// Abort the running job, if any, and route the session back to the review
/// step so the run can be retried with the same or an edited prompt.
pub fn cancel(
    jobs: &DashMap<String, JoinHandle<()>>,
    sessions: &DashMap<String, Session>,
    session_id: &str,
) -> Result<Session, String> {
    if let Some((_, handle)) = jobs.remove(session_id) {
        handle.abort();
        info!(session_id, "generation job cancelled");
    }
    let mut session = sessions
        .get_mut(session_id)
        .ok_or_else(|| "session not found".to_string())?;
    if session.phase == Phase::Generating {
        session.fail_generation("Video generation cancelled.".to_string());
    }
    Ok(session.clone())
}

/// Copy the finished video into `dest_dir` under a download-style name.
/// The session keeps its own copy so playback keeps working afterwards.
pub async fn export(
    sessions: &DashMap<String, Session>,
    session_id: &str,
    dest_dir: &Path,
) -> Result<PathBuf, String> {
    let video_path = {
        let session = sessions
            .get(session_id)
            .ok_or_else(|| "session not found".to_string())?;
        if session.phase != Phase::Result {
            return Err("no finished video to export".to_string());
        }
        session
            .video
            .as_ref()
            .ok_or_else(|| "no finished video to export".to_string())?
            .handle
            .path
            .clone()
    };

    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| e.to_string())?;
    let dest = dest_dir.join(export_file_name());
    tokio::fs::copy(&video_path, &dest)
        .await
        .map_err(|e| format!("export failed: {e}"))?;
    info!(path = %dest.display(), "video exported");
    Ok(dest)
}
