use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path as UrlPath, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use log::{error, info};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Directories the media server is allowed to serve from, searched in
/// order. First hit wins.
pub struct MediaDirs {
    pub roots: Vec<PathBuf>,
}

async fn get_audio(
    UrlPath(name): UrlPath<String>,
    State(dirs): State<Arc<MediaDirs>>,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_bare_name(&name) {
        return Err(StatusCode::NOT_FOUND);
    }

    let path = resolve_media_file(&dirs.roots, &name)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    let file = File::open(&path).await.map_err(|_| StatusCode::NOT_FOUND)?;
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(audio_content_type(&name)),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );

    Ok((headers, body))
}

/// Looks a bare file name up across the allowed roots.
async fn resolve_media_file(roots: &[PathBuf], name: &str) -> Option<PathBuf> {
    for root in roots {
        let candidate = root.join(name);
        if let Ok(meta) = tokio::fs::metadata(&candidate).await {
            if meta.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Served names carry no directory structure; anything that looks like a
/// path is refused outright.
fn is_bare_name(name: &str) -> bool {
    !name.is_empty() && name != ".." && !name.contains('/') && !name.contains('\\')
}

fn audio_content_type(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

pub async fn start_media_server(port: u16, dirs: Arc<MediaDirs>) -> Result<(), Box<dyn std::error::Error>> {
    let app = Router::new()
        .route("/audio/{name}", get(get_audio))
        .with_state(dirs);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("media server listening on 127.0.0.1:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn start_media_server_background(port: u16, dirs: Arc<MediaDirs>) {
    tokio::spawn(async move {
        if let Err(e) = start_media_server(port, dirs).await {
            error!("media server error: {}", e);
        }
    });
}

/// Root of the built frontend bundle.
pub struct UiDist {
    pub root: PathBuf,
}

async fn get_ui_index(State(dist): State<Arc<UiDist>>) -> Result<impl IntoResponse, StatusCode> {
    serve_ui_file(&dist.root, "index.html").await
}

async fn get_ui_asset(
    UrlPath(rest): UrlPath<String>,
    State(dist): State<Arc<UiDist>>,
) -> Result<impl IntoResponse, StatusCode> {
    match sanitize_rel_path(&rest) {
        Some(rel) => {
            let candidate = dist.root.join(&rel);
            if tokio::fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                serve_ui_file(&dist.root, &rest).await
            } else {
                // unknown route, hand the SPA its entry point
                serve_ui_file(&dist.root, "index.html").await
            }
        }
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn serve_ui_file(root: &Path, rel: &str) -> Result<impl IntoResponse, StatusCode> {
    let path = root.join(rel);
    let data = tokio::fs::read(&path).await.map_err(|_| StatusCode::NOT_FOUND)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(ui_content_type(rel)),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    Ok((headers, data))
}

/// Normalizes a request path into a relative path under the dist root,
/// refusing traversal and absolute components.
fn sanitize_rel_path(rest: &str) -> Option<PathBuf> {
    let mut rel = PathBuf::new();
    for segment in rest.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." || segment.contains('\\') || segment.contains(':') {
            return None;
        }
        rel.push(segment);
    }
    Some(rel)
}

fn ui_content_type(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "html" => "text/html; charset=utf-8",
        "js" => "text/javascript",
        "css" => "text/css",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

pub async fn start_ui_server(port: u16, dist: Arc<UiDist>) -> Result<(), Box<dyn std::error::Error>> {
    let app = Router::new()
        .route("/", get(get_ui_index))
        .route("/{*rest}", get(get_ui_asset))
        .with_state(dist);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("ui server listening on 127.0.0.1:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn start_ui_server_background(port: u16, dist: Arc<UiDist>) {
    tokio::spawn(async move {
        if let Err(e) = start_ui_server(port, dist).await {
            error!("ui server error: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_exclude_any_path_shape() {
        assert!(is_bare_name("take-3.wav"));
        assert!(is_bare_name("b2bb0e06.mp3"));
        assert!(!is_bare_name(""));
        assert!(!is_bare_name(".."));
        assert!(!is_bare_name("../settings.json"));
        assert!(!is_bare_name("a/b.mp3"));
        assert!(!is_bare_name("a\\b.mp3"));
    }

    #[test]
    fn audio_types_map_by_extension() {
        assert_eq!(audio_content_type("x.mp3"), "audio/mpeg");
        assert_eq!(audio_content_type("x.WAV"), "audio/wav");
        assert_eq!(audio_content_type("x.m4a"), "audio/mp4");
        assert_eq!(audio_content_type("x.mp4"), "video/mp4");
        assert_eq!(audio_content_type("noext"), "application/octet-stream");
    }

    #[test]
    fn traversal_is_rejected_in_ui_paths() {
        assert_eq!(sanitize_rel_path("assets/app.js"), Some(PathBuf::from("assets/app.js")));
        assert_eq!(sanitize_rel_path("a//b"), Some(PathBuf::from("a/b")));
        assert!(sanitize_rel_path("../secrets").is_none());
        assert!(sanitize_rel_path("a/../../b").is_none());
        assert!(sanitize_rel_path("c:\\windows").is_none());
    }

    #[tokio::test]
    async fn media_lookup_searches_roots_in_order() {
        let uploads = tempfile::tempdir().unwrap();
        let temp_audio = tempfile::tempdir().unwrap();
        tokio::fs::write(temp_audio.path().join("late.wav"), b"x")
            .await
            .unwrap();
        tokio::fs::write(uploads.path().join("both.wav"), b"u")
            .await
            .unwrap();
        tokio::fs::write(temp_audio.path().join("both.wav"), b"t")
            .await
            .unwrap();

        let roots = vec![uploads.path().to_path_buf(), temp_audio.path().to_path_buf()];

        let hit = resolve_media_file(&roots, "late.wav").await.unwrap();
        assert!(hit.starts_with(temp_audio.path()));

        let hit = resolve_media_file(&roots, "both.wav").await.unwrap();
        assert!(hit.starts_with(uploads.path()));

        assert!(resolve_media_file(&roots, "missing.wav").await.is_none());
    }
}
