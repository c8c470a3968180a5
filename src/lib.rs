mod error;
mod gemini;
mod media;
mod session;
mod settings;
mod utils;
mod veo;
mod wizard;

use anyhow::Result;
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::error::WizardError;
use crate::gemini::GeminiAnalyzer;
use crate::session::{DisplayHandle, Phase, SelectedImage, Session};
use crate::settings::{load_settings_from_dir, save_settings_to_dir, Settings};
use crate::utils::{ensure_data_dir, previews_dir, videos_dir};
use crate::veo::VeoClient;
use crate::wizard::{JobMap, SessionMap};

#[derive(Clone)]
struct AppState {
    data_dir: PathBuf,
    sessions: SessionMap,
    jobs: JobMap,
}

#[derive(Debug, Serialize, Deserialize)]
struct AppHealth {
    ok: bool,
    data_dir: String,
    has_api_key: bool,
}

// ===== Tauri Commands =====

#[tauri::command]
async fn health(state: tauri::State<'_, AppState>) -> Result<AppHealth, String> {
    let settings = load_settings_from_dir(&state.data_dir);
    Ok(AppHealth {
        ok: true,
        data_dir: state.data_dir.display().to_string(),
        has_api_key: settings.api_key().is_some(),
    })
}

#[tauri::command]
async fn get_settings(state: tauri::State<'_, AppState>) -> Result<Settings, String> {
    Ok(load_settings_from_dir(&state.data_dir))
}

#[tauri::command]
async fn update_settings(
    state: tauri::State<'_, AppState>,
    settings: Settings,
) -> Result<Settings, String> {
    save_settings_to_dir(&state.data_dir, &settings).map_err(|e| e.to_string())?;
    Ok(settings)
}

#[tauri::command]
async fn create_session(state: tauri::State<'_, AppState>) -> Result<Session, String> {
    let id = Uuid::new_v4().to_string();
    let session = Session::new(id.clone());
    state.sessions.insert(id.clone(), session.clone());
    info!(session_id = %id, "wizard session created");
    Ok(session)
}

#[tauri::command]
async fn destroy_session(
    state: tauri::State<'_, AppState>,
    session_id: String,
) -> Result<(), String> {
    if let Some((_, handle)) = state.jobs.remove(&session_id) {
        handle.abort();
    }
    if let Some((_, mut session)) = state.sessions.remove(&session_id) {
        session.release_all();
    }
    Ok(())
}

#[tauri::command]
async fn get_session(
    state: tauri::State<'_, AppState>,
    session_id: String,
) -> Result<Session, String> {
    state
        .sessions
        .get(&session_id)
        .map(|s| s.clone())
        .ok_or_else(|| "session not found".to_string())
}

#[tauri::command]
async fn select_image(
    state: tauri::State<'_, AppState>,
    session_id: String,
    path: String,
) -> Result<Session, String> {
    // Check the session before materializing anything under previews/.
    {
        let session = state
            .sessions
            .get(&session_id)
            .ok_or_else(|| "session not found".to_string())?;
        if session.phase != Phase::Upload {
            return Err("an image can only be selected on the upload step".to_string());
        }
    }

    let src = PathBuf::from(path);
    let mime_type = media::validate_selection(&src)
        .await
        .map_err(|e| e.user_message())?;
    let size_bytes = tokio::fs::metadata(&src)
        .await
        .map_err(|e| e.to_string())?
        .len();

    let extension = match mime_type {
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    };
    let preview = DisplayHandle::from_copy(&previews_dir(&state.data_dir), &src, extension)
        .map_err(|e| e.to_string())?;

    let Some(mut session) = state.sessions.get_mut(&session_id) else {
        preview.release();
        return Err("session not found".to_string());
    };
    session.select_image(SelectedImage {
        path: src,
        mime_type: mime_type.to_string(),
        size_bytes,
        preview,
    })?;
    Ok(session.clone())
}

#[tauri::command]
async fn clear_image(
    state: tauri::State<'_, AppState>,
    session_id: String,
) -> Result<Session, String> {
    let mut session = state
        .sessions
        .get_mut(&session_id)
        .ok_or_else(|| "session not found".to_string())?;
    session.clear_image()?;
    Ok(session.clone())
}

#[tauri::command]
async fn analyze_image(
    state: tauri::State<'_, AppState>,
    session_id: String,
) -> Result<Session, String> {
    let settings = load_settings_from_dir(&state.data_dir);
    let Some(api_key) = settings.api_key() else {
        // Missing credential blocks the call but never kills the session.
        let mut session = state
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| "session not found".to_string())?;
        session.set_error(WizardError::Configuration.user_message());
        return Ok(session.clone());
    };

    let analyzer = GeminiAnalyzer::new(api_key, settings.analysis_model());
    wizard::analyze(&analyzer, &state.sessions, &session_id).await
}

#[tauri::command]
async fn set_prompt(
    state: tauri::State<'_, AppState>,
    session_id: String,
    prompt: String,
) -> Result<Session, String> {
    let mut session = state
        .sessions
        .get_mut(&session_id)
        .ok_or_else(|| "session not found".to_string())?;
    session.set_prompt(prompt)?;
    Ok(session.clone())
}

#[tauri::command]
async fn start_generation(
    state: tauri::State<'_, AppState>,
    session_id: String,
) -> Result<Session, String> {
    let settings = load_settings_from_dir(&state.data_dir);
    let Some(api_key) = settings.api_key() else {
        let mut session = state
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| "session not found".to_string())?;
        session.set_error(WizardError::Configuration.user_message());
        return Ok(session.clone());
    };

    let ops = Arc::new(VeoClient::new(api_key, settings.video_model()));
    let handle = wizard::spawn_generation(
        ops,
        state.sessions.clone(),
        state.jobs.clone(),
        session_id.clone(),
        Duration::from_secs(settings.poll_interval_secs()),
        videos_dir(&state.data_dir),
    )?;
    state.jobs.insert(session_id.clone(), handle);

    state
        .sessions
        .get(&session_id)
        .map(|s| s.clone())
        .ok_or_else(|| "session not found".to_string())
}

#[tauri::command]
async fn cancel_generation(
    state: tauri::State<'_, AppState>,
    session_id: String,
) -> Result<Session, String> {
    wizard::cancel(&state.jobs, &state.sessions, &session_id)
}

#[tauri::command]
async fn back_to_upload(
    state: tauri::State<'_, AppState>,
    session_id: String,
) -> Result<Session, String> {
    let mut session = state
        .sessions
        .get_mut(&session_id)
        .ok_or_else(|| "session not found".to_string())?;
    session.back_to_upload()?;
    Ok(session.clone())
}

#[tauri::command]
async fn dismiss_error(
    state: tauri::State<'_, AppState>,
    session_id: String,
) -> Result<Session, String> {
    let mut session = state
        .sessions
        .get_mut(&session_id)
        .ok_or_else(|| "session not found".to_string())?;
    session.dismiss_error();
    Ok(session.clone())
}

#[tauri::command]
async fn reset_session(
    state: tauri::State<'_, AppState>,
    session_id: String,
) -> Result<Session, String> {
    if let Some((_, handle)) = state.jobs.remove(&session_id) {
        handle.abort();
    }
    let mut session = state
        .sessions
        .get_mut(&session_id)
        .ok_or_else(|| "session not found".to_string())?;
    session.reset();
    Ok(session.clone())
}

#[tauri::command]
async fn export_video(
    state: tauri::State<'_, AppState>,
    session_id: String,
    dest_dir: String,
) -> Result<String, String> {
    let dest = wizard::export(&state.sessions, &session_id, &PathBuf::from(dest_dir)).await?;
    Ok(dest.display().to_string())
}

// ===== Startup and Main =====

static STARTUP: Lazy<Result<AppState>> = Lazy::new(tauri_startup);
static LOG_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

fn init_tracing(data_dir: &std::path::Path) {
    let appender = tracing_appender::rolling::daily(data_dir.join("logs"), "walkthru.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
}

fn tauri_startup() -> Result<AppState> {
    let data_dir = ensure_data_dir()?;
    init_tracing(&data_dir);

    Ok(AppState {
        data_dir,
        sessions: Arc::new(DashMap::new()),
        jobs: Arc::new(DashMap::new()),
    })
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let state = STARTUP.as_ref().expect("startup failed").clone();

    tauri::Builder::default()
        .manage(state)
        .plugin(tauri_plugin_opener::init())
        .invoke_handler(tauri::generate_handler![
            health,
            get_settings,
            update_settings,
            create_session,
            destroy_session,
            get_session,
            select_image,
            clear_image,
            analyze_image,
            set_prompt,
            start_generation,
            cancel_generation,
            back_to_upload,
            dismiss_error,
            reset_session,
            export_video
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
