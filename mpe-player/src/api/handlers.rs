//! HTTP request handlers

use crate::api::AppContext;
use crate::error::Error;
use crate::playback::synthetic::SyntheticParams;
use crate::playback::types::{PlaybackSettings, StreamKind, SyncSettings, SyncSource, TrackInfo, TrackType};
use crate::session::Session;
use crate::state::PlaybackState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use mpe_common::time::{ms_to_us, us_to_ms};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    sessions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Optional overrides for the generated stream
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    duration_ms: Option<u64>,
    has_audio: Option<bool>,
    has_video: Option<bool>,
    timed_text: Option<bool>,
    captions: Option<bool>,
    video_fps: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    sessions: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    position_ms: i64,
    #[serde(default)]
    notify: bool,
}

#[derive(Debug, Serialize)]
pub struct PositionResponse {
    position_ms: i64,
    position_us: i64,
    state: PlaybackState,
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    state: PlaybackState,
    audio_flush: String,
    video_flush: String,
    presented_frames: u64,
    audio_frames_written: u64,
}

#[derive(Debug, Deserialize)]
pub struct SyncSettingsRequest {
    #[serde(default)]
    source: SyncSource,
    #[serde(default)]
    tolerance: f32,
    #[serde(default)]
    video_fps_hint: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct SyncSettingsResponse {
    source: SyncSource,
    tolerance: f32,
    video_fps_hint: f32,
}

#[derive(Debug, Serialize)]
pub struct TracksResponse {
    tracks: Vec<TrackInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SelectTrackRequest {
    index: usize,
    #[serde(default = "default_select")]
    select: bool,
    #[serde(default)]
    time_ms: i64,
}

fn default_select() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SelectedTrackQuery {
    #[serde(rename = "type")]
    track_type: TrackType,
}

#[derive(Debug, Serialize)]
pub struct SelectedTrackResponse {
    index: Option<usize>,
}

type ApiError = (StatusCode, Json<StatusResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Map an engine error to an HTTP status with a JSON body
pub fn error_response(e: Error) -> ApiError {
    let code = match &e {
        Error::InvalidTrack(_) | Error::BadValue(_) => StatusCode::BAD_REQUEST,
        Error::Common(mpe_common::Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) | Error::Common(mpe_common::Error::NotFound(_)) => StatusCode::NOT_FOUND,
        Error::InvalidState(_) | Error::NotReady(_) => StatusCode::CONFLICT,
        Error::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if code == StatusCode::INTERNAL_SERVER_ERROR {
        error!("request failed: {}", e);
    }
    (
        code,
        Json(StatusResponse {
            status: format!("error: {}", e),
        }),
    )
}

fn ok() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
    })
}

fn session(ctx: &AppContext, id: Uuid) -> Result<Arc<Session>, ApiError> {
    ctx.sessions.get(id).map_err(error_response)
}

// ============================================================================
// Health and session lifecycle
// ============================================================================

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "mpe-player".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: ctx.sessions.len(),
    })
}

/// GET /sessions
pub async fn list_sessions(State(ctx): State<AppContext>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: ctx.sessions.list(),
    })
}

/// POST /sessions
pub async fn create_session(
    State(ctx): State<AppContext>,
    request: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let mut params = SyntheticParams::from_config(ctx.sessions.config());
    if let Some(duration_ms) = request.duration_ms {
        params.duration_ms = duration_ms;
    }
    if let Some(has_audio) = request.has_audio {
        params.has_audio = has_audio;
    }
    if let Some(has_video) = request.has_video {
        params.has_video = has_video;
    }
    if let Some(timed_text) = request.timed_text {
        params.timed_text = timed_text;
    }
    if let Some(captions) = request.captions {
        params.captions = captions;
    }
    if let Some(video_fps) = request.video_fps {
        if !(video_fps > 0.0) {
            return Err(error_response(Error::BadValue(format!("video_fps {}", video_fps))));
        }
        params.video_fps = video_fps;
    }

    let session = ctx.sessions.create(params).await.map_err(error_response)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse { session_id: session.id }),
    ))
}

/// DELETE /sessions/:id
pub async fn delete_session(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ctx.sessions.remove(id).await.map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Transport
// ============================================================================

/// POST /sessions/:id/prepare
pub async fn prepare(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> ApiResult<StatusResponse> {
    session(&ctx, id)?.controller.prepare_async().map_err(error_response)?;
    Ok(ok())
}

/// POST /sessions/:id/start
pub async fn start(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> ApiResult<StatusResponse> {
    info!(session_id = %id, "start requested");
    session(&ctx, id)?.controller.start().map_err(error_response)?;
    Ok(ok())
}

/// POST /sessions/:id/pause
pub async fn pause(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> ApiResult<StatusResponse> {
    session(&ctx, id)?.controller.pause().map_err(error_response)?;
    Ok(ok())
}

/// POST /sessions/:id/resume
pub async fn resume(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> ApiResult<StatusResponse> {
    session(&ctx, id)?.controller.resume().map_err(error_response)?;
    Ok(ok())
}

/// POST /sessions/:id/reset
pub async fn reset(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> ApiResult<StatusResponse> {
    session(&ctx, id)?.controller.reset().map_err(error_response)?;
    Ok(ok())
}

/// POST /sessions/:id/seek
pub async fn seek(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<SeekRequest>,
) -> ApiResult<StatusResponse> {
    if request.position_ms < 0 {
        return Err(error_response(Error::BadValue(format!(
            "position_ms {}",
            request.position_ms
        ))));
    }
    session(&ctx, id)?
        .controller
        .seek_to(ms_to_us(request.position_ms), request.notify)
        .map_err(error_response)?;
    Ok(ok())
}

// ============================================================================
// Queries
// ============================================================================

/// GET /sessions/:id/position
pub async fn get_position(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> ApiResult<PositionResponse> {
    let session = session(&ctx, id)?;
    let position_us = session.controller.current_position_us().map_err(error_response)?;
    Ok(Json(PositionResponse {
        position_ms: us_to_ms(position_us),
        position_us,
        state: session.controller.playback_state(),
    }))
}

/// GET /sessions/:id/status
pub async fn get_status(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> ApiResult<SessionStatusResponse> {
    let session = session(&ctx, id)?;
    let flush = session.controller.flush_status().await.map_err(error_response)?;
    Ok(Json(SessionStatusResponse {
        state: session.controller.playback_state(),
        audio_flush: flush.get(StreamKind::Audio).to_string(),
        video_flush: flush.get(StreamKind::Video).to_string(),
        presented_frames: session.surface.presented_frames(),
        audio_frames_written: session.sink.frames_written(),
    }))
}

// ============================================================================
// Settings
// ============================================================================

/// GET /sessions/:id/playback_settings
pub async fn get_playback_settings(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<PlaybackSettings> {
    let settings = session(&ctx, id)?
        .controller
        .playback_settings()
        .await
        .map_err(error_response)?;
    Ok(Json(settings))
}

/// POST /sessions/:id/playback_settings
pub async fn set_playback_settings(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    Json(settings): Json<PlaybackSettings>,
) -> ApiResult<StatusResponse> {
    session(&ctx, id)?
        .controller
        .set_playback_settings(settings)
        .await
        .map_err(error_response)?;
    Ok(ok())
}

/// GET /sessions/:id/sync_settings
pub async fn get_sync_settings(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<SyncSettingsResponse> {
    let (settings, video_fps_hint) = session(&ctx, id)?
        .controller
        .sync_settings()
        .await
        .map_err(error_response)?;
    Ok(Json(SyncSettingsResponse {
        source: settings.source,
        tolerance: settings.tolerance,
        video_fps_hint,
    }))
}

/// POST /sessions/:id/sync_settings
pub async fn set_sync_settings(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<SyncSettingsRequest>,
) -> ApiResult<StatusResponse> {
    let settings = SyncSettings {
        source: request.source,
        tolerance: request.tolerance,
    };
    session(&ctx, id)?
        .controller
        .set_sync_settings(settings, request.video_fps_hint.unwrap_or(-1.0))
        .await
        .map_err(error_response)?;
    Ok(ok())
}

// ============================================================================
// Tracks
// ============================================================================

/// GET /sessions/:id/tracks
pub async fn get_tracks(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> ApiResult<TracksResponse> {
    let tracks = session(&ctx, id)?
        .controller
        .track_info()
        .await
        .map_err(error_response)?;
    Ok(Json(TracksResponse { tracks }))
}

/// POST /sessions/:id/tracks/select
pub async fn select_track(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<SelectTrackRequest>,
) -> ApiResult<StatusResponse> {
    session(&ctx, id)?
        .controller
        .select_track(request.index, request.select, ms_to_us(request.time_ms))
        .await
        .map_err(error_response)?;
    Ok(ok())
}

/// GET /sessions/:id/tracks/selected?type=
pub async fn get_selected_track(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<SelectedTrackQuery>,
) -> ApiResult<SelectedTrackResponse> {
    let index = session(&ctx, id)?
        .controller
        .selected_track(query.track_type)
        .await
        .map_err(error_response)?;
    Ok(Json(SelectedTrackResponse { index }))
}
