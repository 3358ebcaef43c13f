pub mod clip;
pub mod waveform;

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::editor::clip::AudioClip;
use crate::errors::{AppError, Result};
use crate::transcode;
use crate::utils::ensure_dir_exists;

pub const HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryState {
    pub can_undo: bool,
    pub can_redo: bool,
    pub has_clipboard: bool,
}

/// Shape the UI expects from `get_current_info`.
#[derive(Debug, Clone, Serialize)]
pub struct ClipInfo {
    pub duration: f64,
    pub frame_rate: u32,
    pub channels: u16,
    pub sample_width: u16,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimeRegion {
    pub start: f64,
    pub end: f64,
}

/// The editing session: current buffer, bounded snapshot history with a
/// cursor, and a single-slot clipboard.
///
/// History invariant: the cursor always points at the snapshot equal to the
/// current buffer. A mutating operation drops everything beyond the cursor
/// (the redo tail), pushes the new state, and evicts the oldest snapshot
/// once more than `HISTORY_CAPACITY` are held.
#[derive(Debug, Default)]
pub struct AudioEditor {
    current: Option<AudioClip>,
    history: VecDeque<AudioClip>,
    cursor: usize,
    clipboard: Option<AudioClip>,
}

impl AudioEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a decoded clip the session buffer. History restarts at exactly
    /// this snapshot; the clipboard survives across loads.
    pub fn load_clip(&mut self, clip: AudioClip) {
        self.history.clear();
        self.history.push_back(clip.clone());
        self.cursor = 0;
        self.current = Some(clip);
    }

    pub fn current(&self) -> Result<&AudioClip> {
        self.current.as_ref().ok_or(AppError::NoAudioLoaded)
    }

    fn commit(&mut self, clip: AudioClip) {
        self.history.truncate(self.cursor + 1);
        self.history.push_back(clip.clone());
        self.cursor = self.history.len() - 1;
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
            self.cursor -= 1;
        }
        self.current = Some(clip);
        debug!(
            "History commit: {} snapshots, cursor {}",
            self.history.len(),
            self.cursor
        );
    }

    /// Steps the cursor back one snapshot. `false` when already at the
    /// oldest (or nothing is loaded); that is a no-op, not an error.
    pub fn undo(&mut self) -> bool {
        if self.current.is_none() || self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.current = Some(self.history[self.cursor].clone());
        true
    }

    /// Steps the cursor forward one snapshot. `false` at the newest end.
    pub fn redo(&mut self) -> bool {
        if self.current.is_none() || self.cursor + 1 >= self.history.len() {
            return false;
        }
        self.cursor += 1;
        self.current = Some(self.history[self.cursor].clone());
        true
    }

    pub fn history_state(&self) -> HistoryState {
        HistoryState {
            can_undo: self.current.is_some() && self.cursor > 0,
            can_redo: self.current.is_some() && self.cursor + 1 < self.history.len(),
            has_clipboard: self.clipboard.is_some(),
        }
    }

    #[cfg(test)]
    fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn current_info(&self) -> Result<ClipInfo> {
        let clip = self.current()?;
        Ok(ClipInfo {
            duration: (clip.duration_seconds() * 100.0).round() / 100.0,
            frame_rate: clip.sample_rate,
            channels: clip.channels,
            sample_width: clip.sample_width,
        })
    }

    /// Copies `[start, end)` (seconds) into the clipboard, overwriting
    /// whatever was there.
    pub fn copy_selection(&mut self, start: f64, end: f64) -> Result<()> {
        let clip = self.current()?;
        self.clipboard = Some(clip.slice_ms(seconds_to_ms(start), seconds_to_ms(end)));
        Ok(())
    }

    /// Splices the clipboard into the buffer at `position` seconds,
    /// conforming it to the buffer's rate and channel count first. The
    /// clipboard itself is left untouched.
    pub fn paste_at(&mut self, position: f64) -> Result<()> {
        let clipboard = self
            .clipboard
            .as_ref()
            .ok_or_else(|| AppError::Unsupported("clipboard is empty".to_string()))?;
        let clip = self.current()?;
        let pasted = clipboard.conform_to(clip.sample_rate, clip.channels);

        let mut next = clip.clone();
        next.splice_at(seconds_to_ms(position), &pasted);
        self.commit(next);
        Ok(())
    }

    /// Cuts the buffer at every breakpoint and drops the segments that
    /// overlap a deleted region, keeping the rest in order.
    ///
    /// Breakpoints are {0, duration} plus the split points plus both edges
    /// of every deleted region, in milliseconds, sorted and deduplicated.
    /// A segment `[a, b)` dies iff `max(a, start) < min(b, end)` for some
    /// deleted region `[start, end)`. Splits alone therefore change
    /// nothing but the cut positions.
    pub fn trim_and_delete(&mut self, split_points: &[f64], deleted_regions: &[TimeRegion]) -> Result<()> {
        let clip = self.current()?;
        let duration = clip.duration_ms();

        let regions: Vec<(u64, u64)> = deleted_regions
            .iter()
            .map(|r| (seconds_to_ms(r.start), seconds_to_ms(r.end)))
            .collect();

        let mut breakpoints: BTreeSet<u64> = BTreeSet::new();
        breakpoints.insert(0);
        breakpoints.insert(duration);
        for point in split_points {
            breakpoints.insert(seconds_to_ms(*point).min(duration));
        }
        for (start, end) in &regions {
            breakpoints.insert((*start).min(duration));
            breakpoints.insert((*end).min(duration));
        }

        let points: Vec<u64> = breakpoints.into_iter().collect();
        let mut next = AudioClip {
            samples: Vec::new(),
            sample_rate: clip.sample_rate,
            channels: clip.channels,
            sample_width: clip.sample_width,
        };

        let mut kept = 0usize;
        let mut dropped = 0usize;
        for pair in points.windows(2) {
            let (seg_start, seg_end) = (pair[0], pair[1]);
            let dead = regions
                .iter()
                .any(|(start, end)| seg_start.max(*start) < seg_end.min(*end));
            if dead {
                dropped += 1;
            } else {
                next.append(&clip.slice_ms(seg_start, seg_end));
                kept += 1;
            }
        }

        info!(
            "Trim/delete: kept {} segments, dropped {}, {:.2}s -> {:.2}s",
            kept,
            dropped,
            clip.duration_seconds(),
            next.duration_seconds()
        );
        self.commit(next);
        Ok(())
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds <= 0.0 {
        0
    } else {
        (seconds * 1000.0).round() as u64
    }
}

/// Runs a CPU-bound media task off the async runtime.
pub(crate) async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AppError::Media(format!("background media task failed: {}", e)))?
}

/// Writes a clip to `dest`, creating the output directory when missing.
/// WAV is written directly; any other target format goes through a
/// scratch WAV and ffmpeg.
pub async fn export(clip: AudioClip, dest: &Path, bitrate: &str, scratch_dir: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        ensure_dir_exists(parent).await?;
    }
    let ext = dest
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    if ext == "wav" {
        let dest = dest.to_path_buf();
        run_blocking(move || clip.write_wav(&dest)).await
    } else {
        let staged = scratch_dir.join(format!("export_{}.wav", Uuid::new_v4().simple()));
        let temp = staged.clone();
        run_blocking(move || clip.write_wav(&temp)).await?;
        let converted = transcode::convert_audio_format(&staged, dest, bitrate).await;
        let _ = tokio::fs::remove_file(&staged).await;
        converted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::clip::stub_clip;

    fn region(start: f64, end: f64) -> TimeRegion {
        TimeRegion { start, end }
    }

    fn loaded_editor(duration_ms: u64, rate: u32) -> AudioEditor {
        let mut editor = AudioEditor::new();
        editor.load_clip(stub_clip(duration_ms, rate, 1));
        editor
    }

    /// One mutating edit: shaves a millisecond off the front.
    fn edit(editor: &mut AudioEditor) {
        editor.trim_and_delete(&[], &[region(0.0, 0.001)]).unwrap();
    }

    #[test]
    fn undo_succeeds_exactly_n_times() {
        let mut editor = loaded_editor(1_000, 1_000);
        for _ in 0..3 {
            edit(&mut editor);
        }

        for _ in 0..3 {
            assert!(editor.undo());
        }
        assert!(!editor.undo());
        assert_eq!(editor.current().unwrap().samples.len(), 1_000);
    }

    #[test]
    fn redo_succeeds_exactly_k_times() {
        let mut editor = loaded_editor(1_000, 1_000);
        for _ in 0..4 {
            edit(&mut editor);
        }
        for _ in 0..2 {
            assert!(editor.undo());
        }

        assert!(editor.redo());
        assert!(editor.redo());
        assert!(!editor.redo());
        assert_eq!(editor.current().unwrap().samples.len(), 996);
    }

    #[test]
    fn edit_after_undo_truncates_redo_tail() {
        let mut editor = loaded_editor(1_000, 1_000);
        edit(&mut editor);
        edit(&mut editor);
        assert!(editor.undo());
        assert!(editor.history_state().can_redo);

        edit(&mut editor);
        assert!(!editor.history_state().can_redo);
        assert!(!editor.redo());
    }

    #[test]
    fn history_holds_ten_snapshots_and_evicts_the_oldest() {
        let mut editor = loaded_editor(1_000, 1_000);
        for _ in 0..11 {
            edit(&mut editor);
        }
        assert_eq!(editor.history_len(), HISTORY_CAPACITY);

        let mut undos = 0;
        while editor.undo() {
            undos += 1;
        }
        assert_eq!(undos, HISTORY_CAPACITY - 1);
        // The loaded state and the first edit were evicted; the oldest
        // reachable snapshot is the result of edit #2.
        assert_eq!(editor.current().unwrap().samples.len(), 998);
    }

    #[test]
    fn splits_alone_delete_nothing() {
        let mut editor = loaded_editor(60_000, 100);
        let before = editor.current().unwrap().clone();

        editor.trim_and_delete(&[10.0, 20.0, 45.5], &[]).unwrap();

        let after = editor.current().unwrap();
        assert_eq!(after.duration_ms(), 60_000);
        assert_eq!(after.samples, before.samples);
    }

    #[test]
    fn deleting_a_middle_region_keeps_the_flanks() {
        let mut editor = AudioEditor::new();
        let mut clip = stub_clip(60_000, 100, 1);
        for (i, s) in clip.samples.iter_mut().enumerate() {
            *s = i as f32;
        }
        editor.load_clip(clip.clone());

        editor.trim_and_delete(&[], &[region(10.0, 20.0)]).unwrap();

        let after = editor.current().unwrap();
        assert_eq!(after.duration_ms(), 50_000);
        // [0, 10s) stays put, [20s, 60s) slides in right after it.
        assert_eq!(after.samples[0], 0.0);
        assert_eq!(after.samples[999], 999.0);
        assert_eq!(after.samples[1_000], 2_000.0);
        assert_eq!(after.samples.len(), 5_000);
    }

    #[test]
    fn split_points_inside_a_deleted_region_change_nothing() {
        let mut editor = loaded_editor(60_000, 100);
        editor
            .trim_and_delete(&[12.0, 15.0], &[region(10.0, 20.0)])
            .unwrap();
        assert_eq!(editor.current().unwrap().duration_ms(), 50_000);
    }

    #[test]
    fn copy_paste_appends_clipboard_content() {
        let mut editor = loaded_editor(1_000, 1_000);
        editor.copy_selection(0.0, 0.25).unwrap();
        assert!(editor.history_state().has_clipboard);

        editor.paste_at(1.0).unwrap();
        assert_eq!(editor.current().unwrap().samples.len(), 1_250);
        // Paste is a mutating edit: it must be undoable.
        assert!(editor.undo());
        assert_eq!(editor.current().unwrap().samples.len(), 1_000);
    }

    #[test]
    fn paste_conforms_a_clipboard_from_another_file() {
        let mut editor = loaded_editor(1_000, 1_000);
        editor.copy_selection(0.0, 0.5).unwrap();

        editor.load_clip(stub_clip(1_000, 2_000, 1));
        editor.paste_at(0.0).unwrap();

        let after = editor.current().unwrap();
        assert_eq!(after.sample_rate, 2_000);
        // Half a second lands as 1000 frames at the buffer's own rate.
        assert_eq!(after.samples.len(), 3_000);
        assert_eq!(after.duration_ms(), 1_500);
    }

    #[test]
    fn operations_without_audio_fail() {
        let mut editor = AudioEditor::new();
        assert!(matches!(
            editor.trim_and_delete(&[], &[]),
            Err(AppError::NoAudioLoaded)
        ));
        assert!(matches!(editor.current_info(), Err(AppError::NoAudioLoaded)));
        assert!(!editor.undo());
        assert!(!editor.redo());
        assert!(!editor.history_state().can_undo);
    }

    #[test]
    fn deleting_everything_leaves_an_empty_buffer() {
        let mut editor = loaded_editor(5_000, 100);
        editor.trim_and_delete(&[], &[region(0.0, 5.0)]).unwrap();

        let after = editor.current().unwrap();
        assert!(after.is_empty());
        assert_eq!(after.duration_ms(), 0);
        assert!(editor.undo());
        assert_eq!(editor.current().unwrap().duration_ms(), 5_000);
    }

    #[tokio::test]
    async fn export_writes_wav_and_creates_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out").join("take.wav");

        export(stub_clip(250, 8_000, 1), &dest, "192k", dir.path())
            .await
            .unwrap();
        assert!(dest.is_file());
    }
}
