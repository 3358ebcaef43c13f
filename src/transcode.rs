use std::path::Path;

use log::{error, info};

use crate::errors::{AppError, Result};
use crate::utils::{find_ffmpeg, tool_command};

pub const AUDIO_OUTPUT_FORMATS: &[&str] = &["mp3", "wav", "ogg", "flac", "m4a"];
pub const VIDEO_OUTPUT_FORMATS: &[&str] = &["mp4", "avi", "mkv", "mov", "webm"];

/// Input extensions treated as video when routing a conversion request.
const VIDEO_INPUT_FORMATS: &[&str] = &["mp4", "avi", "mkv"];
/// Output formats the conversion UI routes to an audio target.
const ROUTED_AUDIO_OUTPUTS: &[&str] = &["mp3", "wav", "ogg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    ExtractAudio,
    Audio,
    Video,
}

/// Picks the operation for an input file and requested output format, the
/// way the conversion panel routes: video in + audio out extracts, audio in
/// + audio out converts audio, video in + video out converts video.
pub fn classify(input: &Path, output_format: &str) -> Result<Conversion> {
    let format = output_format.to_ascii_lowercase();
    let video_in = VIDEO_INPUT_FORMATS.contains(&extension_of(input).as_str());
    let audio_out = ROUTED_AUDIO_OUTPUTS.contains(&format.as_str());

    match (video_in, audio_out) {
        (true, true) => Ok(Conversion::ExtractAudio),
        (false, true) => Ok(Conversion::Audio),
        (true, false) => Ok(Conversion::Video),
        (false, false) => Err(AppError::Unsupported(format!(
            "conversion of {:?} to '{}'",
            input.file_name().unwrap_or_default(),
            output_format
        ))),
    }
}

/// Drops the audio track of a video file into a standalone audio file.
pub async fn extract_audio_from_video(input: &Path, output: &Path) -> Result<()> {
    check_input(input)?;
    check_output_format(output, AUDIO_OUTPUT_FORMATS)?;
    run_ffmpeg(input, output, &["-vn"]).await
}

/// Re-encodes audio into the container/codec implied by the output
/// extension.
pub async fn convert_audio_format(input: &Path, output: &Path, bitrate: &str) -> Result<()> {
    check_input(input)?;
    check_output_format(output, AUDIO_OUTPUT_FORMATS)?;
    run_ffmpeg(input, output, &["-b:a", bitrate]).await
}

/// Re-encodes video with a widely playable codec pair.
pub async fn convert_video_format(input: &Path, output: &Path) -> Result<()> {
    check_input(input)?;
    check_output_format(output, VIDEO_OUTPUT_FORMATS)?;
    run_ffmpeg(input, output, &["-c:v", "libx264", "-c:a", "aac"]).await
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

fn check_input(input: &Path) -> Result<()> {
    if !input.exists() {
        return Err(AppError::NotFound(input.display().to_string()));
    }
    Ok(())
}

/// Output extension gatekeeper. Runs before any subprocess so a bad target
/// can never leave a partial file behind.
fn check_output_format(output: &Path, supported: &[&str]) -> Result<()> {
    let ext = extension_of(output);
    if ext.is_empty() || !supported.contains(&ext.as_str()) {
        return Err(AppError::Unsupported(format!("output format '{}'", ext)));
    }
    Ok(())
}

async fn run_ffmpeg(input: &Path, output: &Path, extra: &[&str]) -> Result<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let ffmpeg = find_ffmpeg();
    info!("ffmpeg: {:?} -> {:?} (args {:?})", input, output, extra);

    let result = tool_command(&ffmpeg)
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(extra)
        .arg(output)
        .output()
        .await
        .map_err(|e| AppError::Subprocess(format!("failed to run ffmpeg: {}", e)))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        let reason = last_line(&stderr);
        error!("ffmpeg failed on {:?}: {}", input, reason);
        // A failed run must not leave a partial file behind.
        let _ = tokio::fs::remove_file(output).await;
        return Err(AppError::Subprocess(format!("ffmpeg: {}", reason)));
    }

    if !output.exists() {
        return Err(AppError::Subprocess(format!(
            "ffmpeg produced no output for {:?}",
            input
        )));
    }
    Ok(())
}

fn last_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("unknown error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn classify_routes_by_extension_pair() {
        let video = Path::new("talk.mp4");
        let audio = Path::new("talk.flac");

        assert_eq!(classify(video, "mp3").unwrap(), Conversion::ExtractAudio);
        assert_eq!(classify(audio, "wav").unwrap(), Conversion::Audio);
        assert_eq!(classify(video, "mkv").unwrap(), Conversion::Video);
        assert!(classify(audio, "docx").is_err());
    }

    #[tokio::test]
    async fn unsupported_extension_fails_before_any_spawn() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.mp3");
        std::fs::write(&input, b"stub").unwrap();
        let output = dir.path().join("out.xyz");

        let err = convert_audio_format(&input, &output, "192k").await.unwrap_err();
        assert!(matches!(err, AppError::Unsupported(_)));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn missing_input_is_reported_first() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.mp3");

        let err = extract_audio_from_video(Path::new("/no/such/clip.mp4"), &output)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(!output.exists());
    }

    #[test]
    fn last_line_skips_trailing_blanks() {
        assert_eq!(last_line("a\nreal error\n\n"), "real error");
        assert_eq!(last_line(""), "unknown error");
    }
}
