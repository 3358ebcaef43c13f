use tauri::State;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Local;
use futures::future::join_all;
use log::{info, warn};

use crate::config::SettingsStore;
use crate::editor::clip::AudioClip;
use crate::editor::{self, run_blocking, waveform, AudioEditor, TimeRegion};
use crate::errors::{AppError, Result};
use crate::fetchers::bilibili::{self, BiliClient, PreviewInfo, SearchHit};
use crate::fetchers::{PreviewCache, ThumbnailCache, VideoSummary, YtSession};
use crate::fetchers::youtube::YtDlpClient;
use crate::separator::{SeparationRequest, StemSeparator};
use crate::transcode::{self, Conversion};
use crate::utils::{ensure_dir_exists, sanitize_filename};

pub const DEFAULT_WAVEFORM_WIDTH: usize = 800;
const DEFAULT_AUDIO_BITRATE: &str = "192k";
const DEFAULT_SEARCH_PAGE_SIZE: u32 = 20;
const DEFAULT_COLLECTION_PAGE_SIZE: u32 = 50;

// State management
pub struct AppState {
    pub settings: Arc<Mutex<SettingsStore>>,
    pub editor: Arc<Mutex<AudioEditor>>,
    pub separator: Arc<StemSeparator>,
    pub bili: Arc<BiliClient>,
    pub thumbnails: ThumbnailCache,
    pub previews: PreviewCache,
    pub uploads_dir: PathBuf,
    pub temp_audio_dir: PathBuf,
    pub media_base: String,
}

/// Every command resolves with a `success` object; failures never reject
/// the invoke promise. Separation failures carry their worker-reported
/// category alongside the message.
fn respond(result: Result<Value>) -> Value {
    match result {
        Ok(value) => value,
        Err(AppError::Separation { error_type, message }) => json!({
            "success": false,
            "error": message,
            "error_type": error_type,
        }),
        Err(e) => json!({ "success": false, "error": e.to_string() }),
    }
}

fn paging(page: Option<u32>, size: Option<u32>, default_size: u32) -> (u32, u32) {
    (page.unwrap_or(1).max(1), size.unwrap_or(default_size).max(1))
}

fn media_file_url(base: &str, name: &str) -> String {
    format!("{}/audio/{}", base, urlencoding::encode(name))
}

fn data_url(base64_bytes: &str) -> String {
    format!("data:image/jpeg;base64,{}", base64_bytes)
}

/// Collision-proof name for a file landing in the uploads dir.
fn unique_upload_name(original: &str) -> String {
    let tag = Uuid::new_v4().simple().to_string();
    format!("{}_{}", &tag[..8], sanitize_filename(original))
}

fn decode_base64_payload(data: &str) -> Result<Vec<u8>> {
    // Tolerates both raw base64 and data-URL payloads from the recorder.
    let raw = data.rsplit(',').next().unwrap_or("");
    BASE64
        .decode(raw.trim())
        .map_err(|e| AppError::Unsupported(format!("invalid base64 payload: {}", e)))
}

/// Maps a UI-supplied path or bare file name onto something on disk,
/// checking the served directories for bare names.
fn resolve_media_path(state: &AppState, given: &str) -> PathBuf {
    let path = PathBuf::from(given);
    if path.exists() {
        return path;
    }
    if let Some(name) = path.file_name() {
        let upload = state.uploads_dir.join(name);
        if upload.exists() {
            return upload;
        }
        let temp = state.temp_audio_dir.join(name);
        if temp.exists() {
            return temp;
        }
    }
    path
}

fn save_dialog(app: &tauri::AppHandle, default_name: &str) -> Result<Option<PathBuf>> {
    use tauri_plugin_dialog::DialogExt;
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();

    app.dialog()
        .file()
        .set_file_name(default_name)
        .save_file(move |path| {
            let _ = tx.send(path);
        });

    match rx.recv() {
        Ok(Some(path)) => Ok(Some(PathBuf::from(path.to_string()))),
        Ok(None) => Ok(None),
        Err(e) => Err(AppError::Dialog(format!("save dialog failed: {}", e))),
    }
}

/// Trims the session buffer and writes the result to an already-resolved
/// destination. The buffer and history are first touched here; a cancelled
/// save dialog never reaches this point.
async fn trim_and_export(
    editor: &Mutex<AudioEditor>,
    split_points: &[f64],
    deleted_regions: &[TimeRegion],
    dest: &Path,
    temp_dir: &Path,
) -> Result<()> {
    let clip = {
        let mut guard = editor.lock().await;
        guard.trim_and_delete(split_points, deleted_regions)?;
        guard.current()?.clone()
    };
    editor::export(clip, dest, DEFAULT_AUDIO_BITRATE, temp_dir).await
}

// Settings and file system

#[tauri::command]
pub async fn get_settings(
    state: State<'_, AppState>,
) -> std::result::Result<serde_json::Value, AppError> {
    let settings = state.settings.lock().await;
    Ok(json!({ "success": true, "settings": settings.all() }))
}

#[tauri::command]
pub async fn save_app_settings(
    state: State<'_, AppState>,
    settings: Map<String, Value>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let mut store = state.settings.lock().await;
        store.merge(settings)?;
        Ok(json!({ "success": true }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn get_cwd() -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = std::env::current_dir()
        .map(|cwd| json!({ "success": true, "cwd": cwd.to_string_lossy() }))
        .map_err(AppError::from);
    Ok(respond(result))
}

#[derive(Debug, Serialize)]
struct DirEntryInfo {
    name: String,
    is_dir: bool,
    size: u64,
}

fn sort_entries(entries: &mut [DirEntryInfo]) {
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

#[tauri::command]
pub async fn list_directory(
    state: State<'_, AppState>,
    path: Option<String>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let dir = match path {
            Some(p) => {
                let dir = PathBuf::from(p);
                if !dir.is_dir() {
                    return Err(AppError::NotFound(dir.to_string_lossy().to_string()));
                }
                dir
            }
            None => {
                let dir = state.settings.lock().await.output_dir();
                ensure_dir_exists(&dir).await?;
                dir
            }
        };

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: meta.is_dir(),
                size: if meta.is_file() { meta.len() } else { 0 },
            });
        }
        sort_entries(&mut entries);

        Ok(json!({
            "success": true,
            "path": dir.to_string_lossy(),
            "entries": entries,
        }))
    }
    .await;
    Ok(respond(result))
}

// Media intake

#[tauri::command]
pub async fn upload_file_stream(
    state: State<'_, AppState>,
    file_name: String,
    data: String,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let bytes = decode_base64_payload(&data)?;
        let saved = unique_upload_name(&file_name);
        let dest = state.uploads_dir.join(&saved);

        ensure_dir_exists(&state.uploads_dir).await?;
        tokio::fs::write(&dest, &bytes).await?;
        info!("Uploaded {} ({} bytes) as {}", file_name, bytes.len(), saved);

        Ok(json!({
            "success": true,
            "file_name": saved,
            "url": media_file_url(&state.media_base, &saved),
            "size": bytes.len(),
        }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn save_recorded_audio(
    state: State<'_, AppState>,
    data: String,
    file_name: Option<String>,
    duration: Option<f64>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let bytes = decode_base64_payload(&data)?;
        let name = file_name
            .unwrap_or_else(|| format!("recording_{}.wav", Local::now().format("%Y%m%d_%H%M%S")));
        let saved = unique_upload_name(&name);
        let dest = state.uploads_dir.join(&saved);

        ensure_dir_exists(&state.uploads_dir).await?;
        tokio::fs::write(&dest, &bytes).await?;

        let duration = match duration {
            Some(d) => Some(d),
            None => {
                let probe = dest.clone();
                match run_blocking(move || AudioClip::decode(&probe)).await {
                    Ok(clip) => Some(clip.duration_seconds()),
                    Err(e) => {
                        warn!("Could not probe recording duration: {}", e);
                        None
                    }
                }
            }
        };

        Ok(json!({
            "success": true,
            "file_name": saved,
            "url": media_file_url(&state.media_base, &saved),
            "duration": duration,
        }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn get_audio_url(
    state: State<'_, AppState>,
    file_name: String,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let name = Path::new(&file_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| AppError::NotFound(file_name.clone()))?;

        if !state.uploads_dir.join(&name).exists() && !state.temp_audio_dir.join(&name).exists() {
            return Err(AppError::NotFound(name));
        }
        Ok(json!({
            "success": true,
            "url": media_file_url(&state.media_base, &name),
        }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn get_local_file_url(
    state: State<'_, AppState>,
    file_path: String,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let source = PathBuf::from(&file_path);
        if !source.is_file() {
            return Err(AppError::NotFound(file_path.clone()));
        }

        // Already inside a served directory: link it directly.
        if let (Some(parent), Some(name)) = (source.parent(), source.file_name()) {
            if parent == state.uploads_dir || parent == state.temp_audio_dir {
                let name = name.to_string_lossy().to_string();
                return Ok(json!({
                    "success": true,
                    "file_name": name,
                    "url": media_file_url(&state.media_base, &name),
                }));
            }
        }

        let original = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let saved = unique_upload_name(&original);
        ensure_dir_exists(&state.uploads_dir).await?;
        tokio::fs::copy(&source, state.uploads_dir.join(&saved)).await?;

        Ok(json!({
            "success": true,
            "file_name": saved,
            "url": media_file_url(&state.media_base, &saved),
        }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn get_current_audio_url(
    state: State<'_, AppState>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let clip = {
            let editor = state.editor.lock().await;
            editor.current()?.clone()
        };

        let name = format!("current_{}.mp3", Local::now().format("%Y%m%d%H%M%S"));
        let dest = state.temp_audio_dir.join(&name);
        editor::export(clip, &dest, DEFAULT_AUDIO_BITRATE, &state.temp_audio_dir).await?;

        Ok(json!({
            "success": true,
            "file_name": name,
            "url": media_file_url(&state.media_base, &name),
        }))
    }
    .await;
    Ok(respond(result))
}

// Editor

#[tauri::command]
pub async fn load_audio(
    state: State<'_, AppState>,
    file_path: String,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let path = resolve_media_path(&state, &file_path);
        if !path.is_file() {
            return Err(AppError::NotFound(file_path.clone()));
        }

        let decode_path = path.clone();
        let clip = run_blocking(move || AudioClip::decode(&decode_path)).await?;
        info!(
            "Loaded audio {:?}: {:.2}s, {} Hz, {} ch",
            path,
            clip.duration_seconds(),
            clip.sample_rate,
            clip.channels
        );

        let mut editor = state.editor.lock().await;
        editor.load_clip(clip);
        Ok(json!({
            "success": true,
            "info": editor.current_info()?,
            "history": editor.history_state(),
        }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn export_audio(
    app: tauri::AppHandle,
    state: State<'_, AppState>,
    output_path: Option<String>,
    bitrate: Option<String>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let clip = {
            let editor = state.editor.lock().await;
            editor.current()?.clone()
        };

        let dest = match output_path {
            Some(p) => PathBuf::from(p),
            None => {
                let default_name = format!("edited_{}.wav", Local::now().format("%Y%m%d_%H%M%S"));
                match save_dialog(&app, &default_name)? {
                    Some(p) => p,
                    None => return Ok(json!({ "success": false, "error": "save cancelled" })),
                }
            }
        };

        let bitrate = bitrate.unwrap_or_else(|| DEFAULT_AUDIO_BITRATE.to_string());
        editor::export(clip, &dest, &bitrate, &state.temp_audio_dir).await?;
        info!("Exported audio to {:?}", dest);

        Ok(json!({ "success": true, "path": dest.to_string_lossy() }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn undo_audio(
    state: State<'_, AppState>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let mut editor = state.editor.lock().await;
        if !editor.undo() {
            return Ok(json!({ "success": false, "error": "nothing to undo" }));
        }
        Ok(json!({
            "success": true,
            "info": editor.current_info()?,
            "history": editor.history_state(),
        }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn redo_audio(
    state: State<'_, AppState>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let mut editor = state.editor.lock().await;
        if !editor.redo() {
            return Ok(json!({ "success": false, "error": "nothing to redo" }));
        }
        Ok(json!({
            "success": true,
            "info": editor.current_info()?,
            "history": editor.history_state(),
        }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn copy_audio_selection(
    state: State<'_, AppState>,
    start: f64,
    end: f64,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let mut editor = state.editor.lock().await;
        editor.copy_selection(start, end)?;
        Ok(json!({ "success": true, "history": editor.history_state() }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn paste_audio_selection(
    state: State<'_, AppState>,
    position: f64,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let mut editor = state.editor.lock().await;
        editor.paste_at(position)?;
        Ok(json!({
            "success": true,
            "info": editor.current_info()?,
            "history": editor.history_state(),
        }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn get_audio_history_state(
    state: State<'_, AppState>,
) -> std::result::Result<serde_json::Value, AppError> {
    let editor = state.editor.lock().await;
    Ok(json!({ "success": true, "state": editor.history_state() }))
}

#[tauri::command]
pub async fn process_and_export_audio(
    app: tauri::AppHandle,
    state: State<'_, AppState>,
    split_points: Vec<f64>,
    deleted_regions: Vec<TimeRegion>,
    output_path: Option<String>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        // Nothing loaded: fail before any dialog or mutation.
        {
            let editor = state.editor.lock().await;
            editor.current()?;
        }

        let dest = match output_path.filter(|p| !p.is_empty()) {
            Some(p) => PathBuf::from(p),
            None => {
                let default_name = format!("edited_{}.wav", Local::now().format("%Y%m%d_%H%M%S"));
                match save_dialog(&app, &default_name)? {
                    Some(p) => p,
                    None => return Ok(json!({ "success": false, "error": "save cancelled" })),
                }
            }
        };

        trim_and_export(
            &state.editor,
            &split_points,
            &deleted_regions,
            &dest,
            &state.temp_audio_dir,
        )
        .await?;

        let editor = state.editor.lock().await;
        Ok(json!({
            "success": true,
            "path": dest.to_string_lossy(),
            "info": editor.current_info()?,
            "history": editor.history_state(),
        }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn generate_waveform(
    state: State<'_, AppState>,
    file_path: String,
    width: Option<usize>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let path = resolve_media_path(&state, &file_path);
        if !path.is_file() {
            return Err(AppError::NotFound(file_path.clone()));
        }

        let width = width.unwrap_or(DEFAULT_WAVEFORM_WIDTH).max(1);
        let data = run_blocking(move || waveform::sample(&path, width)).await?;

        Ok(json!({
            "success": true,
            "points": data.points,
            "duration": data.duration,
        }))
    }
    .await;
    Ok(respond(result))
}

// Transcoding

#[tauri::command]
pub async fn form_transformation(
    state: State<'_, AppState>,
    file_path: String,
    output_format: String,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let input = resolve_media_path(&state, &file_path);
        if !input.is_file() {
            return Err(AppError::NotFound(file_path.clone()));
        }

        let output_dir = state.settings.lock().await.output_dir();
        ensure_dir_exists(&output_dir).await?;

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "converted".to_string());
        let output = output_dir.join(format!("{}_converted.{}", stem, output_format.to_lowercase()));

        match transcode::classify(&input, &output_format)? {
            Conversion::ExtractAudio => transcode::extract_audio_from_video(&input, &output).await?,
            Conversion::Audio => {
                transcode::convert_audio_format(&input, &output, DEFAULT_AUDIO_BITRATE).await?
            }
            Conversion::Video => transcode::convert_video_format(&input, &output).await?,
        }

        Ok(json!({
            "success": true,
            "output_path": output.to_string_lossy(),
        }))
    }
    .await;
    Ok(respond(result))
}

// Stem separation

#[tauri::command]
pub async fn process_audio(
    state: State<'_, AppState>,
    stems: u32,
    input_filename: String,
    output_directory: Option<String>,
    codec: Option<String>,
    bitrate: Option<String>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let input = state.uploads_dir.join(&input_filename);
        let output_dir = match output_directory {
            Some(dir) => PathBuf::from(dir),
            None => state.settings.lock().await.output_dir(),
        };

        let request = SeparationRequest {
            stems,
            input,
            output_dir,
            codec: codec.unwrap_or_else(|| "wav".to_string()),
            bitrate: bitrate.unwrap_or_else(|| "128k".to_string()),
        };
        let outcome = state.separator.separate(&request).await?;

        Ok(json!({
            "success": true,
            "processing_time": outcome.processing_time,
            "output_files": outcome.output_files,
        }))
    }
    .await;
    Ok(respond(result))
}

// Video platforms

async fn bili_summary(state: &AppState, hit: &SearchHit) -> VideoSummary {
    let url = format!("https://www.bilibili.com/video/{}", hit.bvid);
    match state.bili.video_view(&hit.bvid).await {
        Ok(view) => {
            let pic = match cached_thumbnail(state, &view.pic).await {
                Ok(encoded) => data_url(&encoded),
                Err(e) => {
                    warn!("Thumbnail fetch failed for {}: {}", hit.bvid, e);
                    view.pic.clone()
                }
            };
            VideoSummary {
                bvid: view.bvid,
                title: view.title,
                url,
                pic,
                author: view
                    .owner
                    .map(|o| o.name)
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| "unknown".to_string()),
                duration: view.duration.map(Value::from).unwrap_or(Value::Null),
            }
        }
        Err(e) => {
            warn!("Detail fetch failed for {}: {}", hit.bvid, e);
            VideoSummary {
                bvid: hit.bvid.clone(),
                title: hit.title.clone(),
                url,
                pic: String::new(),
                author: "unknown".to_string(),
                duration: Value::Null,
            }
        }
    }
}

async fn cached_thumbnail(state: &AppState, url: &str) -> Result<String> {
    if url.is_empty() {
        return Err(AppError::NotFound("thumbnail url".to_string()));
    }
    if let Some(hit) = state.thumbnails.get(url).await {
        return Ok(hit);
    }
    let encoded = state.bili.fetch_thumbnail(url).await?;
    state
        .thumbnails
        .insert(url.to_string(), encoded.clone())
        .await;
    Ok(encoded)
}

#[tauri::command]
pub async fn search_videos(
    state: State<'_, AppState>,
    keyword: String,
    platform: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let platform = platform.unwrap_or_else(|| "bilibili".to_string());
        let (page, page_size) = paging(page, page_size, DEFAULT_SEARCH_PAGE_SIZE);

        match platform.as_str() {
            "bilibili" => {
                let (hits, total) = state.bili.search(&keyword, page, page_size).await?;
                let videos =
                    join_all(hits.iter().map(|hit| bili_summary(&state, hit))).await;
                Ok(json!({
                    "success": true,
                    "videos": videos,
                    "total_pages": bilibili::page_count(total, page_size),
                }))
            }
            "youtube" => {
                let session = {
                    let settings = state.settings.lock().await;
                    YtSession::from_settings(&settings)
                };
                let client = YtDlpClient::new(session);
                let result = client.search(&keyword, page, page_size).await?;
                Ok(json!({
                    "success": true,
                    "videos": result.videos,
                    "total_pages": result.total_pages,
                }))
            }
            other => Err(AppError::Unsupported(format!("unknown platform: {}", other))),
        }
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn get_video_preview(
    state: State<'_, AppState>,
    bvid: String,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        if let Some(hit) = state.previews.get(&bvid).await {
            return Ok(json!({ "success": true, "preview": hit }));
        }

        let view = state.bili.video_view(&bvid).await?;
        let page_url = format!("https://www.bilibili.com/video/{}", bvid);
        let play_info = state.bili.playinfo(&page_url).await?;

        let direct_url = play_info
            .data
            .as_ref()
            .and_then(|d| d.dash.as_ref())
            .and_then(|d| d.video.first())
            .map(|s| s.base_url.clone())
            .unwrap_or_default();

        let preview = PreviewInfo {
            bvid: bvid.clone(),
            title: view.title,
            author: view
                .owner
                .map(|o| o.name)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
            cover: view.pic,
            direct_url,
            embed_url: format!(
                "https://player.bilibili.com/player.html?bvid={}&high_quality=1&autoplay=0",
                bvid
            ),
        };
        state.previews.insert(bvid, preview.clone()).await;

        Ok(json!({ "success": true, "preview": preview }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn download_video(
    state: State<'_, AppState>,
    bvid: String,
    title: String,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let dest = state.settings.lock().await.output_dir();
        let page_url = format!("https://www.bilibili.com/video/{}", bvid);
        let play_info = state.bili.playinfo(&page_url).await?;
        let outcome = state.bili.download(&play_info, &title, &dest).await?;

        Ok(json!({
            "success": true,
            "message": outcome.message,
            "path": outcome.path.to_string_lossy(),
        }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn download_youtube_video(
    state: State<'_, AppState>,
    url: String,
    title: Option<String>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let dest = state.settings.lock().await.output_dir();
        let session = {
            let settings = state.settings.lock().await;
            YtSession::from_settings(&settings)
        };
        if let Some(title) = &title {
            info!("Downloading youtube video '{}'", title);
        }

        let client = YtDlpClient::new(session);
        let path = client.download(&url, &dest).await?;

        Ok(json!({ "success": true, "path": path.to_string_lossy() }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn check_if_playlist(
    state: State<'_, AppState>,
    url: String,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let session = {
            let settings = state.settings.lock().await;
            YtSession::from_settings(&settings)
        };
        let client = YtDlpClient::new(session);
        let probe = client.check_playlist(&url).await?;
        Ok(json!({
            "success": true,
            "is_playlist": probe.is_playlist,
            "title": probe.title,
            "url": probe.url,
        }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn download_playlist(
    state: State<'_, AppState>,
    url: String,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let dest = state.settings.lock().await.output_dir();
        let session = {
            let settings = state.settings.lock().await;
            YtSession::from_settings(&settings)
        };
        let client = YtDlpClient::new(session);
        let path = client.download_playlist(&url, &dest).await?;

        Ok(json!({ "success": true, "path": path.to_string_lossy() }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn whether_collection(
    state: State<'_, AppState>,
    bvid: String,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let info = state.bili.collection_info(&bvid).await?;
        Ok(json!({
            "success": true,
            "is_collection": info.is_collection,
            "title": info.title,
            "season_id": info.season_id,
            "mid": info.owner_mid,
        }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn get_collection_videos(
    state: State<'_, AppState>,
    mid: i64,
    season_id: i64,
    page_num: Option<u32>,
    page_size: Option<u32>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let (page_num, page_size) = paging(page_num, page_size, DEFAULT_COLLECTION_PAGE_SIZE);
        let page = state
            .bili
            .collection_videos(mid, season_id, page_num, page_size)
            .await?;
        Ok(json!({ "success": true, "videos": page.archives, "meta": page.meta }))
    }
    .await;
    Ok(respond(result))
}

#[tauri::command]
pub async fn get_image_proxy(
    state: State<'_, AppState>,
    url: String,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let encoded = cached_thumbnail(&state, &url).await?;
        Ok(json!({ "success": true, "image": data_url(&encoded) }))
    }
    .await;
    Ok(respond(result))
}

// Dialogs

#[tauri::command]
pub async fn open_save_file_dialog(
    app: tauri::AppHandle,
    default_filename: Option<String>,
) -> std::result::Result<serde_json::Value, AppError> {
    let result: Result<Value> = async {
        let default_name = default_filename.unwrap_or_else(|| "untitled.wav".to_string());
        match save_dialog(&app, &default_name)? {
            Some(path) => Ok(json!({ "success": true, "path": path.to_string_lossy() })),
            None => Ok(json!({ "success": false, "error": "save cancelled" })),
        }
    }
    .await;
    Ok(respond(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respond_passes_success_objects_through() {
        let value = respond(Ok(json!({ "success": true, "n": 3 })));
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["n"], json!(3));
    }

    #[test]
    fn respond_maps_errors_to_failure_objects() {
        let value = respond(Err(AppError::NotFound("x.wav".to_string())));
        assert_eq!(value["success"], json!(false));
        assert!(value["error"].as_str().unwrap().contains("x.wav"));
        assert!(value.get("error_type").is_none());
    }

    #[test]
    fn respond_keeps_separation_error_categories() {
        let value = respond(Err(AppError::Separation {
            error_type: "OutOfMemory".to_string(),
            message: "worker ran out of memory".to_string(),
        }));
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error_type"], json!("OutOfMemory"));
        assert_eq!(value["error"], json!("worker ran out of memory"));
    }

    #[test]
    fn upload_names_are_tagged_and_sanitized() {
        let name = unique_upload_name("my song?.mp3");
        assert_eq!(name.as_bytes()[8], b'_');
        assert!(name.ends_with("my song_.mp3"));

        let other = unique_upload_name("my song?.mp3");
        assert_ne!(name, other);
    }

    #[test]
    fn media_urls_are_percent_encoded() {
        let url = media_file_url("http://127.0.0.1:5000", "my take 1.wav");
        assert_eq!(url, "http://127.0.0.1:5000/audio/my%20take%201.wav");
    }

    #[test]
    fn base64_payloads_accept_data_urls() {
        let plain = decode_base64_payload("aGVsbG8=").unwrap();
        assert_eq!(plain, b"hello");

        let data_url = decode_base64_payload("data:audio/wav;base64,aGVsbG8=").unwrap();
        assert_eq!(data_url, b"hello");

        assert!(decode_base64_payload("not base64!!!").is_err());
    }

    #[test]
    fn directories_sort_before_files() {
        let mut entries = vec![
            DirEntryInfo { name: "b.mp3".into(), is_dir: false, size: 10 },
            DirEntryInfo { name: "Archive".into(), is_dir: true, size: 0 },
            DirEntryInfo { name: "a.mp3".into(), is_dir: false, size: 10 },
            DirEntryInfo { name: "stems".into(), is_dir: true, size: 0 },
        ];
        sort_entries(&mut entries);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Archive", "stems", "a.mp3", "b.mp3"]);
    }

    #[test]
    fn paging_defaults_differ_for_search_and_collections() {
        assert_eq!(paging(None, None, DEFAULT_SEARCH_PAGE_SIZE), (1, 20));
        assert_eq!(paging(None, None, DEFAULT_COLLECTION_PAGE_SIZE), (1, 50));
        assert_eq!(paging(Some(0), Some(0), 20), (1, 1));
        assert_eq!(paging(Some(3), Some(40), 20), (3, 40));
    }

    #[tokio::test]
    async fn trim_and_export_commits_and_writes_in_one_step() {
        use crate::editor::clip::stub_clip;

        let editor = Mutex::new(AudioEditor::new());
        editor.lock().await.load_clip(stub_clip(1_000, 8_000, 1));

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("trimmed.wav");
        trim_and_export(
            &editor,
            &[],
            &[TimeRegion { start: 0.0, end: 0.5 }],
            &dest,
            dir.path(),
        )
        .await
        .unwrap();

        let mut guard = editor.lock().await;
        assert!(dest.is_file());
        assert_eq!(guard.current().unwrap().duration_ms(), 500);
        // Exactly one snapshot beyond the load.
        assert!(guard.undo());
        assert!(!guard.undo());
        assert_eq!(guard.current().unwrap().duration_ms(), 1_000);
    }
}
