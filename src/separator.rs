use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use log::{error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::errors::{AppError, Result};
use crate::utils::{ensure_dir_exists, find_ffmpeg, tool_command};

/// Stem layouts the separation model supports, keyed by stem count.
pub fn stem_names(stems: u32) -> Result<&'static [&'static str]> {
    match stems {
        2 => Ok(&["vocals", "accompaniment"]),
        4 => Ok(&["vocals", "drums", "bass", "other"]),
        5 => Ok(&["vocals", "drums", "bass", "piano", "other"]),
        other => Err(AppError::Unsupported(format!(
            "stem count {} (expected 2, 4 or 5)",
            other
        ))),
    }
}

#[derive(Debug, Clone)]
pub struct SeparationRequest {
    pub stems: u32,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub codec: String,
    pub bitrate: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StemFile {
    pub name: String,
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeparationOutcome {
    pub processing_time: f64,
    pub output_files: Vec<StemFile>,
}

/// Runs the pretrained separation model in an isolated child process, one
/// job per process. The worker reads a single JSON request on stdin and
/// reports a single JSON result line on stdout; a worker that exits without
/// reporting anything is an undetermined failure, distinct from a reported
/// error. Jobs are fully serialized; the model is far too heavy to overlap.
pub struct StemSeparator {
    interpreter: PathBuf,
    worker_script: PathBuf,
    job_slot: Mutex<()>,
}

impl StemSeparator {
    pub fn new(worker_script: PathBuf) -> Self {
        let interpreter = std::env::var("PYTHON_BINARY")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("python"));
        Self {
            interpreter,
            worker_script,
            job_slot: Mutex::new(()),
        }
    }

    pub async fn separate(&self, request: &SeparationRequest) -> Result<SeparationOutcome> {
        // Validate everything before a process exists to be cleaned up.
        let names = stem_names(request.stems)?;
        if !request.input.exists() {
            return Err(AppError::NotFound(request.input.display().to_string()));
        }
        ensure_dir_exists(&request.output_dir).await?;

        let _job = self.job_slot.lock().await;
        let started = Instant::now();
        info!(
            "Separating {:?} into {} stems ({} @ {})",
            request.input, request.stems, request.codec, request.bitrate
        );

        let result = self.run_worker(request).await?;

        if !result.get("success").and_then(Value::as_bool).unwrap_or(false) {
            let message = result
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown separation error")
                .to_string();
            let error_type = result
                .get("error_type")
                .and_then(Value::as_str)
                .unwrap_or("SeparationError")
                .to_string();
            error!("Separation worker reported {}: {}", error_type, message);
            return Err(AppError::Separation { error_type, message });
        }

        let processing_time = result
            .get("processing_time")
            .and_then(Value::as_f64)
            .unwrap_or_else(|| started.elapsed().as_secs_f64());

        let output_files = self.collect_stems(request, names).await;
        info!(
            "Separation finished in {:.1}s, {} stem files",
            processing_time,
            output_files.len()
        );

        Ok(SeparationOutcome {
            processing_time,
            output_files,
        })
    }

    /// Spawns one worker for one job and waits it out. `kill_on_drop`
    /// covers every early-exit path, so a half-fed worker never outlives
    /// the request.
    async fn run_worker(&self, request: &SeparationRequest) -> Result<Value> {
        let payload = json!({
            "stems": request.stems,
            "input": request.input.to_string_lossy(),
            "output_dir": request.output_dir.to_string_lossy(),
            "codec": request.codec,
            "bitrate": request.bitrate,
            "filename_format": "{filename}/{instrument}.{codec}",
        });

        let mut cmd = tool_command(&self.interpreter);
        cmd.arg(&self.worker_script)
            .env("FFMPEG_BINARY", find_ffmpeg())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::Subprocess(format!("failed to start separation worker: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let line = serde_json::to_string(&payload)?;
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AppError::Subprocess(format!("failed to wait for worker: {}", e)))?;

        if !output.status.success() {
            warn!("Separation worker exited with {}", output.status);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_worker_result(&stdout) {
            Some(result) => Ok(result),
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                error!(
                    "Separation worker exited ({}) without a result. stderr: {}",
                    output.status,
                    stderr.lines().last().unwrap_or("<empty>")
                );
                Err(AppError::Separation {
                    error_type: "Undetermined".to_string(),
                    message: "separation worker exited without reporting a result".to_string(),
                })
            }
        }
    }

    /// The worker writes `<output_dir>/<input stem>/<stem>.<codec>`; gather
    /// what actually landed on disk.
    async fn collect_stems(&self, request: &SeparationRequest, names: &[&str]) -> Vec<StemFile> {
        let song = request
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let song_dir = request.output_dir.join(&song);

        let mut files = Vec::new();
        for name in names {
            let path = song_dir.join(format!("{}.{}", name, request.codec));
            match tokio::fs::metadata(&path).await {
                Ok(meta) => files.push(StemFile {
                    name: name.to_string(),
                    path: path.display().to_string(),
                    size: meta.len(),
                }),
                Err(_) => warn!("Expected stem file missing: {:?}", path),
            }
        }
        files
    }
}

/// The "queue drain": the last JSON object line on stdout is the result.
/// Anything else the worker printed is noise.
fn parse_worker_result(stdout: &str) -> Option<Value> {
    stdout.lines().rev().find_map(|line| {
        let line = line.trim();
        if line.starts_with('{') {
            serde_json::from_str::<Value>(line).ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn request(stems: u32, input: PathBuf, output_dir: PathBuf) -> SeparationRequest {
        SeparationRequest {
            stems,
            input,
            output_dir,
            codec: "wav".to_string(),
            bitrate: "128k".to_string(),
        }
    }

    #[test]
    fn stem_layouts_match_the_model() {
        assert_eq!(stem_names(2).unwrap(), &["vocals", "accompaniment"]);
        assert_eq!(stem_names(4).unwrap().len(), 4);
        assert_eq!(stem_names(5).unwrap(), &["vocals", "drums", "bass", "piano", "other"]);
        assert!(stem_names(3).is_err());
        assert!(stem_names(0).is_err());
    }

    #[tokio::test]
    async fn bad_arity_fails_before_any_spawn() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("song.mp3");
        std::fs::write(&input, b"stub").unwrap();

        // The worker script does not exist; a spawn attempt would surface
        // as a Subprocess error instead of Unsupported.
        let separator = StemSeparator::new(PathBuf::from("/no/such/worker.py"));
        let err = separator
            .separate(&request(3, input, dir.path().join("out")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unsupported(_)));
    }

    #[tokio::test]
    async fn missing_input_fails_before_any_spawn() {
        let dir = tempdir().unwrap();
        let separator = StemSeparator::new(PathBuf::from("/no/such/worker.py"));
        let err = separator
            .separate(&request(2, dir.path().join("gone.mp3"), dir.path().join("out")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn worker_result_is_the_last_json_line() {
        let stdout = "model loading...\n{\"progress\": 10}\n{\"success\": true, \"processing_time\": 3.5}\n";
        let result = parse_worker_result(stdout).unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["processing_time"], 3.5);
    }

    #[test]
    fn silent_worker_yields_no_result() {
        assert!(parse_worker_result("").is_none());
        assert!(parse_worker_result("loading tensorflow\ndone\n").is_none());
        assert!(parse_worker_result("{broken json").is_none());
    }

    #[test]
    fn reported_failure_carries_type_and_message() {
        let stdout = "{\"success\": false, \"error\": \"CUDA out of memory\", \"error_type\": \"ResourceExhaustedError\"}";
        let result = parse_worker_result(stdout).unwrap();
        assert_eq!(result["success"], false);
        assert_eq!(result["error_type"], "ResourceExhaustedError");
    }
}
