use std::ffi::OsStr;
use std::path::PathBuf;

use log::info;

use crate::errors::Result;

/// Sanitizes a filename by replacing invalid characters, capped at 200 chars
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    cleaned.trim().chars().take(200).collect()
}

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &std::path::Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Locates an external tool: env override, bundled copy next to the
/// executable, PATH lookup, then the bare name as a last resort.
pub fn find_tool(name: &str, env_override: &str) -> PathBuf {
    if let Ok(path) = std::env::var(env_override) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    let binary = if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    };

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let bundled = dir.join(name).join(&binary);
            if bundled.exists() {
                return bundled;
            }
        }
    }

    let finder = if cfg!(windows) { "where" } else { "which" };
    let mut lookup = std::process::Command::new(finder);
    lookup.arg(name);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        lookup.creation_flags(CREATE_NO_WINDOW);
    }
    if let Ok(output) = lookup.output() {
        if output.status.success() {
            if let Some(line) = String::from_utf8_lossy(&output.stdout).lines().next() {
                let line = line.trim();
                if !line.is_empty() {
                    return PathBuf::from(line);
                }
            }
        }
    }

    PathBuf::from(binary)
}

pub fn find_ffmpeg() -> PathBuf {
    find_tool("ffmpeg", "FFMPEG_BINARY")
}

pub fn find_ytdlp() -> PathBuf {
    find_tool("yt-dlp", "YTDLP_BINARY")
}

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Builds a command for an external tool; child consoles stay hidden on Windows.
pub fn tool_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    #[allow(unused_mut)]
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
    }

    #[test]
    fn sanitize_trims_and_caps_length() {
        assert_eq!(sanitize_filename("  spaced out  "), "spaced out");

        let long: String = std::iter::repeat('x').take(300).collect();
        assert_eq!(sanitize_filename(&long).chars().count(), 200);
    }

    #[test]
    fn sanitize_keeps_unicode_titles() {
        assert_eq!(sanitize_filename("周杰伦 - 晴天 (Official)"), "周杰伦 - 晴天 (Official)");
    }

    #[test]
    fn find_tool_prefers_env_override() {
        std::env::set_var("SONIFLOW_TEST_TOOL", "/opt/custom/bin/tool");
        assert_eq!(
            find_tool("definitely-not-a-real-tool", "SONIFLOW_TEST_TOOL"),
            PathBuf::from("/opt/custom/bin/tool")
        );
        std::env::remove_var("SONIFLOW_TEST_TOOL");
    }
}
