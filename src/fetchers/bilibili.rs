use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::StreamExt;
use log::{info, warn};
use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::errors::{AppError, Result};
use crate::fetchers::BiliSession;
use crate::utils::{ensure_dir_exists, find_ffmpeg, sanitize_filename, tool_command};

const SEARCH_URL: &str = "https://api.bilibili.com/x/web-interface/search/type";
const VIEW_URL: &str = "https://api.bilibili.com/x/web-interface/view";
const SEASON_URL: &str = "https://api.bilibili.com/x/polymer/web-space/seasons_archives_list";
const REFERER: &str = "https://www.bilibili.com/";

/// The search UI never pages past this, whatever the API reports.
pub const MAX_SEARCH_PAGES: u32 = 15;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const STREAM_TIMEOUT: Duration = Duration::from_secs(600);

/// Standard bilibili API envelope; `code` 0 is success, anything else
/// carries a human-readable `message`.
#[derive(Debug, Deserialize)]
struct BiliEnvelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default, rename = "numResults")]
    num_results: u32,
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoView {
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pic: String,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub ugc_season: Option<UgcSeason>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub mid: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UgcSeason {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub is_collection: bool,
    pub title: Option<String>,
    pub season_id: Option<i64>,
    pub owner_mid: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveItem {
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pic: String,
    #[serde(default)]
    pub duration: Option<i64>,
}

/// One page of a season/collection listing. `meta` is the API's own season
/// descriptor (name, total, ...), forwarded untouched so the UI can page.
#[derive(Debug, Deserialize)]
pub struct CollectionPage {
    #[serde(default)]
    pub archives: Vec<ArchiveItem>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

/// Playback manifest scraped out of a video page.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayInfo {
    pub data: Option<DashData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashData {
    pub dash: Option<Dash>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dash {
    #[serde(default)]
    pub video: Vec<DashStream>,
    #[serde(default)]
    pub audio: Vec<DashStream>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashStream {
    #[serde(default, alias = "baseUrl")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewInfo {
    pub bvid: String,
    pub title: String,
    pub author: String,
    pub cover: String,
    pub direct_url: String,
    pub embed_url: String,
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub message: String,
    pub path: PathBuf,
}

/// Bilibili web API client. Holds one reqwest client carrying the session
/// identity (cookie, UA, referer) for its whole lifetime.
pub struct BiliClient {
    client: reqwest::Client,
}

impl BiliClient {
    pub fn new(session: BiliSession) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::REFERER, HeaderValue::from_static(REFERER));
        if !session.cookie.is_empty() {
            match HeaderValue::from_str(&session.cookie) {
                Ok(value) => {
                    headers.insert(header::COOKIE, value);
                }
                Err(_) => warn!("bilibili cookie contains invalid header characters, ignoring"),
            }
        }

        let client = reqwest::Client::builder()
            .user_agent(session.user_agent)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client })
    }

    async fn api_get<T: DeserializeOwned>(&self, url: &str, params: &[(&str, String)]) -> Result<T> {
        let envelope: BiliEnvelope<T> = self
            .client
            .get(url)
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if envelope.code != 0 {
            return Err(AppError::Api(format!(
                "bilibili returned code {}: {}",
                envelope.code, envelope.message
            )));
        }
        envelope
            .data
            .ok_or_else(|| AppError::Api("bilibili response carries no data".to_string()))
    }

    /// Keyword search, one page. Returns the hits plus the total result
    /// count the API reports.
    pub async fn search(&self, keyword: &str, page: u32, page_size: u32) -> Result<(Vec<SearchHit>, u32)> {
        let params = [
            ("search_type", "video".to_string()),
            ("keyword", keyword.to_string()),
            ("page", page.to_string()),
            ("page_size", page_size.to_string()),
        ];
        let data: SearchData = self.api_get(SEARCH_URL, &params).await?;
        info!(
            "bilibili search '{}' page {}: {} hits of {}",
            keyword,
            page,
            data.result.len(),
            data.num_results
        );
        Ok((data.result, data.num_results))
    }

    pub async fn video_view(&self, bvid: &str) -> Result<VideoView> {
        self.api_get(VIEW_URL, &[("bvid", bvid.to_string())]).await
    }

    /// Fetches a video page and pulls the playback manifest out of the
    /// inline `window.__playinfo__` script.
    pub async fn playinfo(&self, video_url: &str) -> Result<PlayInfo> {
        let html = self
            .client
            .get(video_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        extract_playinfo(&html)
    }

    /// Season/collection membership for a video.
    pub async fn collection_info(&self, bvid: &str) -> Result<CollectionInfo> {
        let view = self.video_view(bvid).await?;
        match view.ugc_season {
            Some(season) => Ok(CollectionInfo {
                is_collection: true,
                title: Some(season.title),
                season_id: Some(season.id),
                owner_mid: view.owner.map(|o| o.mid),
            }),
            None => Ok(CollectionInfo {
                is_collection: false,
                title: None,
                season_id: None,
                owner_mid: None,
            }),
        }
    }

    pub async fn collection_videos(
        &self,
        mid: i64,
        season_id: i64,
        page_num: u32,
        page_size: u32,
    ) -> Result<CollectionPage> {
        let params = [
            ("mid", mid.to_string()),
            ("season_id", season_id.to_string()),
            ("page_num", page_num.to_string()),
            ("page_size", page_size.to_string()),
            ("sort_reverse", "false".to_string()),
        ];
        self.api_get(SEASON_URL, &params).await
    }

    /// Downloads the first available stream of each kind and merges when
    /// both exist: video+audio muxed to mp4, video-only renamed to mp4,
    /// audio-only kept as mp3.
    pub async fn download(&self, play_info: &PlayInfo, title: &str, dest_dir: &Path) -> Result<DownloadOutcome> {
        let dash = play_info
            .data
            .as_ref()
            .and_then(|d| d.dash.as_ref())
            .ok_or_else(|| AppError::Api("playinfo carries no dash streams".to_string()))?;

        ensure_dir_exists(dest_dir).await?;
        let safe_title = sanitize_filename(title);

        let video_url = dash.video.first().map(|s| s.base_url.clone()).filter(|u| !u.is_empty());
        let audio_url = dash.audio.first().map(|s| s.base_url.clone()).filter(|u| !u.is_empty());

        match (video_url, audio_url) {
            (Some(video), Some(audio)) => {
                let video_tmp = dest_dir.join(format!("{}.flv", safe_title));
                let audio_tmp = dest_dir.join(format!("{}.mp3", safe_title));
                self.fetch_stream(&video, &video_tmp).await?;
                self.fetch_stream(&audio, &audio_tmp).await?;

                let merged = dest_dir.join(format!("{}.mp4", safe_title));
                mux_streams(&video_tmp, &audio_tmp, &merged).await?;
                let _ = tokio::fs::remove_file(&video_tmp).await;
                let _ = tokio::fs::remove_file(&audio_tmp).await;

                info!("Merged video and audio into {:?}", merged);
                Ok(DownloadOutcome {
                    message: "video and audio streams merged".to_string(),
                    path: merged,
                })
            }
            (Some(video), None) => {
                let tmp = dest_dir.join(format!("{}.flv", safe_title));
                self.fetch_stream(&video, &tmp).await?;
                let renamed = dest_dir.join(format!("{}.mp4", safe_title));
                tokio::fs::rename(&tmp, &renamed).await?;
                Ok(DownloadOutcome {
                    message: "video stream only".to_string(),
                    path: renamed,
                })
            }
            (None, Some(audio)) => {
                let path = dest_dir.join(format!("{}.mp3", safe_title));
                self.fetch_stream(&audio, &path).await?;
                Ok(DownloadOutcome {
                    message: "audio stream only".to_string(),
                    path,
                })
            }
            (None, None) => Err(AppError::Api("no downloadable streams in playinfo".to_string())),
        }
    }

    /// Streams a CDN URL to disk chunk by chunk. The per-request timeout
    /// overrides the client-wide one, which is sized for API calls.
    async fn fetch_stream(&self, url: &str, dest: &Path) -> Result<()> {
        info!("Downloading stream to {:?}", dest);
        let response = self
            .client
            .get(url)
            .timeout(STREAM_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// Thumbnail bytes as base64. Timeout and network failure are reported
    /// as distinct errors so the UI can tell a slow CDN from a dead one.
    pub async fn fetch_thumbnail(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_fetch_error)?;

        if !response.status().is_success() {
            return Err(AppError::Network(format!(
                "thumbnail fetch returned {}",
                response.status()
            )));
        }

        let bytes = response.bytes().await.map_err(classify_fetch_error)?;
        Ok(BASE64.encode(&bytes))
    }
}

fn classify_fetch_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Timeout("thumbnail fetch timed out".to_string())
    } else {
        AppError::Network(e.to_string())
    }
}

/// Search paging: ceil(total / per_page), hard-capped at
/// `MAX_SEARCH_PAGES`.
pub fn page_count(total: u32, per_page: u32) -> u32 {
    if per_page == 0 {
        return 0;
    }
    ((total + per_page - 1) / per_page).min(MAX_SEARCH_PAGES)
}

fn extract_playinfo(html: &str) -> Result<PlayInfo> {
    let pattern = Regex::new(r"(?s)<script>window\.__playinfo__=(.*?)</script>")
        .map_err(|e| AppError::Api(format!("playinfo pattern: {}", e)))?;
    let captures = pattern
        .captures(html)
        .ok_or_else(|| AppError::Api("no playinfo found in page".to_string()))?;
    let raw = captures
        .get(1)
        .map(|m| m.as_str())
        .ok_or_else(|| AppError::Api("empty playinfo script".to_string()))?;
    Ok(serde_json::from_str(raw)?)
}

async fn mux_streams(video: &Path, audio: &Path, output: &Path) -> Result<()> {
    let ffmpeg = find_ffmpeg();
    let result = tool_command(&ffmpeg)
        .arg("-y")
        .arg("-i")
        .arg(video)
        .arg("-i")
        .arg(audio)
        .args(["-c:v", "copy", "-c:a", "aac", "-strict", "experimental"])
        .arg(output)
        .output()
        .await
        .map_err(|e| AppError::Subprocess(format!("failed to run ffmpeg: {}", e)))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        let reason = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("unknown error");
        return Err(AppError::Subprocess(format!("ffmpeg mux: {}", reason)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_is_capped_at_fifteen() {
        assert_eq!(page_count(0, 20), 0);
        assert_eq!(page_count(1, 20), 1);
        assert_eq!(page_count(100, 20), 5);
        assert_eq!(page_count(299, 20), 15);
        assert_eq!(page_count(300, 20), 15);
        assert_eq!(page_count(301, 20), 15);
        assert_eq!(page_count(1_000_000, 20), 15);
        assert_eq!(page_count(10, 0), 0);
    }

    #[test]
    fn playinfo_is_scraped_from_the_page_script() {
        let html = concat!(
            "<html><head><script>window.__playinfo__=",
            r#"{"data":{"dash":{"video":[{"baseUrl":"https://cdn.example/v.m4s"}],"audio":[{"base_url":"https://cdn.example/a.m4s"}]}}}"#,
            "</script><script>window.__INITIAL_STATE__={}</script></head></html>"
        );

        let info = extract_playinfo(html).unwrap();
        let dash = info.data.unwrap().dash.unwrap();
        assert_eq!(dash.video[0].base_url, "https://cdn.example/v.m4s");
        assert_eq!(dash.audio[0].base_url, "https://cdn.example/a.m4s");
    }

    #[test]
    fn pages_without_playinfo_are_rejected() {
        assert!(extract_playinfo("<html><body>nothing here</body></html>").is_err());
    }

    #[test]
    fn api_envelope_decodes_search_payloads() {
        let raw = r#"{
            "code": 0,
            "message": "0",
            "data": {"numResults": 43, "result": [{"bvid": "BV1xx411c7mD", "title": "demo"}]}
        }"#;
        let envelope: BiliEnvelope<SearchData> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.code, 0);
        let data = envelope.data.unwrap();
        assert_eq!(data.num_results, 43);
        assert_eq!(data.result[0].bvid, "BV1xx411c7mD");
    }

    #[test]
    fn view_payload_tolerates_missing_season() {
        let raw = r#"{"bvid": "BV1", "title": "t", "pic": "p", "duration": 213, "owner": {"mid": 9, "name": "up"}}"#;
        let view: VideoView = serde_json::from_str(raw).unwrap();
        assert!(view.ugc_season.is_none());
        assert_eq!(view.owner.unwrap().mid, 9);
        assert_eq!(view.duration, Some(213));
    }

    #[test]
    fn collection_page_keeps_the_season_meta() {
        let raw = r#"{
            "archives": [{"bvid": "BV2", "title": "ep1", "pic": "c", "duration": 60}],
            "meta": {"name": "a season", "total": 120}
        }"#;
        let page: CollectionPage = serde_json::from_str(raw).unwrap();
        assert_eq!(page.archives[0].bvid, "BV2");
        assert_eq!(page.meta["total"], 120);

        let empty: CollectionPage = serde_json::from_str("{}").unwrap();
        assert!(empty.archives.is_empty());
        assert!(empty.meta.is_empty());
    }
}
