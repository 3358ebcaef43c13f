use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{AppError, Result};
use crate::fetchers::{SearchPage, VideoSummary, YtSession, DESKTOP_USER_AGENT};
use crate::utils::{ensure_dir_exists, find_ytdlp, sanitize_filename, tool_command};

const MAX_SEARCH_ATTEMPTS: u32 = 3;

/// yt-dlp reports no total result count, so paging advertises a fixed
/// window and the UI handles empty pages.
const FIXED_TOTAL_PAGES: u32 = 10;

/// Merged-stream preference passed to yt-dlp for downloads.
const VIDEO_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

/// Result of probing a URL: playlists carry their title and canonical URL,
/// single videos carry neither.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistProbe {
    pub is_playlist: bool,
    pub title: Option<String>,
    pub url: Option<String>,
}

/// Wrapper around the yt-dlp binary. Each call spawns a fresh process;
/// session identity (cookie, proxy) rides along as flags.
pub struct YtDlpClient {
    session: YtSession,
    binary: PathBuf,
}

impl YtDlpClient {
    pub fn new(session: YtSession) -> Self {
        Self {
            session,
            binary: find_ytdlp(),
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-warnings".to_string(),
            "--user-agent".to_string(),
            DESKTOP_USER_AGENT.to_string(),
            // The web client alone gets throttled; tv goes first.
            "--extractor-args".to_string(),
            "youtube:player_client=tv,web;player_skip=configs".to_string(),
        ];
        if let Some(proxy) = &self.session.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        if !self.session.cookie.is_empty() {
            args.push("--add-header".to_string());
            args.push(format!("Cookie:{}", self.session.cookie));
        }
        args
    }

    async fn run(&self, args: &[String]) -> Result<std::process::Output> {
        tool_command(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| AppError::Subprocess(format!("failed to run yt-dlp: {}", e)))
    }

    /// Keyword search with client-side paging. yt-dlp has no page cursor,
    /// so we ask for `page * per_page` flat results and slice the window
    /// we need.
    pub async fn search(&self, keyword: &str, page: u32, per_page: u32) -> Result<SearchPage> {
        let page = page.max(1);
        let (wanted, skip) = search_window(page, per_page);
        let query = format!("ytsearch{}:{}", wanted, keyword);

        let mut args = self.base_args();
        args.extend([
            "--dump-json".to_string(),
            "--flat-playlist".to_string(),
            query,
        ]);

        let mut last_stderr = String::new();
        for attempt in 1..=MAX_SEARCH_ATTEMPTS {
            let output = self.run(&args).await?;
            if output.status.success() {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let entries: Vec<Value> = stdout
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .filter_map(|l| serde_json::from_str(l).ok())
                    .collect();

                let videos: Vec<_> = entries
                    .iter()
                    .skip(skip as usize)
                    .take(per_page as usize)
                    .map(entry_to_summary)
                    .collect();
                info!(
                    "youtube search '{}' page {}: {} of {} entries",
                    keyword,
                    page,
                    videos.len(),
                    entries.len()
                );
                return Ok(SearchPage {
                    videos,
                    total_pages: FIXED_TOTAL_PAGES,
                });
            }

            last_stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if is_rate_limited(&last_stderr) && attempt < MAX_SEARCH_ATTEMPTS {
                let backoff = rand::thread_rng().gen_range(2.0..5.0);
                warn!(
                    "youtube search rate limited (attempt {}), retrying in {:.1}s",
                    attempt, backoff
                );
                tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                continue;
            }
            break;
        }

        Err(AppError::Subprocess(format!(
            "yt-dlp search failed: {}",
            last_line(&last_stderr)
        )))
    }

    /// Flat metadata probe shared by playlist detection and naming.
    async fn probe_flat(&self, url: &str) -> Result<Value> {
        let mut args = self.base_args();
        args.extend([
            "--flat-playlist".to_string(),
            "--dump-single-json".to_string(),
            url.to_string(),
        ]);

        let output = self.run(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Subprocess(format!(
                "yt-dlp probe failed: {}",
                last_line(&stderr)
            )));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    /// Classifies a URL as playlist or single video.
    pub async fn check_playlist(&self, url: &str) -> Result<PlaylistProbe> {
        let probe = self.probe_flat(url).await?;
        Ok(classify_probe(&probe))
    }

    /// Downloads one video into `dest_dir`, titled by yt-dlp's own
    /// template. Resolves only once the process exits.
    pub async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        ensure_dir_exists(dest_dir).await?;

        let template = dest_dir.join("%(title)s.%(ext)s");
        let mut args = self.base_args();
        args.extend(download_tuning());
        args.extend([
            "--no-playlist".to_string(),
            "-f".to_string(),
            VIDEO_FORMAT.to_string(),
            "-o".to_string(),
            template.to_string_lossy().to_string(),
            url.to_string(),
        ]);

        info!("youtube download starting: {}", url);
        let output = self.run(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Subprocess(format!(
                "yt-dlp download failed: {}",
                last_line(&stderr)
            )));
        }
        Ok(dest_dir.to_path_buf())
    }

    /// Downloads every entry of a playlist into a subdirectory named
    /// after the playlist.
    pub async fn download_playlist(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let probe = self.check_playlist(url).await?;
        let title = probe.title.unwrap_or_else(|| "playlist".to_string());
        let subdir = dest_dir.join(sanitize_filename(&title));
        ensure_dir_exists(&subdir).await?;

        let template = subdir.join("%(title)s.%(ext)s");
        let mut args = self.base_args();
        args.extend(download_tuning());
        args.extend([
            "--yes-playlist".to_string(),
            "-f".to_string(),
            VIDEO_FORMAT.to_string(),
            "-o".to_string(),
            template.to_string_lossy().to_string(),
            url.to_string(),
        ]);

        info!("youtube playlist download starting: {}", url);
        let output = self.run(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Subprocess(format!(
                "yt-dlp playlist download failed: {}",
                last_line(&stderr)
            )));
        }
        Ok(subdir)
    }
}

/// Retry/pacing flags shared by both download paths.
fn download_tuning() -> Vec<String> {
    [
        "--retries",
        "10",
        "--fragment-retries",
        "10",
        "--extractor-retries",
        "3",
        "--sleep-requests",
        "1",
        "--sleep-interval",
        "2",
        "--max-sleep-interval",
        "5",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn is_rate_limited(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    lowered.contains("429") || lowered.contains("too many requests")
}

/// Flat-search window: how many entries to request and how many to skip
/// for a page. Saturates rather than overflowing on absurd inputs.
fn search_window(page: u32, per_page: u32) -> (u32, u32) {
    let page = page.max(1);
    (
        page.saturating_mul(per_page),
        (page - 1).saturating_mul(per_page),
    )
}

fn classify_probe(probe: &Value) -> PlaylistProbe {
    if probe.get("entries").map(|e| e.is_array()).unwrap_or(false) {
        PlaylistProbe {
            is_playlist: true,
            title: Some(
                probe
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Untitled Playlist")
                    .to_string(),
            ),
            url: probe
                .get("webpage_url")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    } else {
        PlaylistProbe {
            is_playlist: false,
            title: None,
            url: None,
        }
    }
}

fn entry_to_summary(entry: &Value) -> VideoSummary {
    let id = entry.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let url = entry
        .get("url")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", id));
    let pic = entry
        .get("thumbnails")
        .and_then(|t| t.as_array())
        .and_then(|t| t.first())
        .and_then(|t| t.get("url"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("https://i.ytimg.com/vi/{}/mqdefault.jpg", id));
    let author = entry
        .get("uploader")
        .or_else(|| entry.get("channel"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    VideoSummary {
        bvid: id,
        title: entry
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        url,
        pic,
        author,
        duration: entry.get("duration").cloned().unwrap_or(Value::Null),
    }
}

fn last_line(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("unknown error")
}
