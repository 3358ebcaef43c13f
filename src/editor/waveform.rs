use std::path::Path;

use serde::Serialize;

use crate::editor::clip::AudioClip;
use crate::errors::Result;

/// Amplitude envelope for UI rendering plus the clip duration in seconds.
#[derive(Debug, Clone, Serialize)]
pub struct WaveformData {
    pub points: Vec<f32>,
    pub duration: f64,
}

/// Decodes a whole file and reduces it to at most `width` points, each the
/// mean absolute amplitude of one chunk of the mono mix. Blocking; callers
/// on the async runtime go through `spawn_blocking`.
pub fn sample(path: &Path, width: usize) -> Result<WaveformData> {
    let clip = AudioClip::decode(path)?;
    Ok(from_clip(&clip, width))
}

pub fn from_clip(clip: &AudioClip, width: usize) -> WaveformData {
    let mono = downmix_to_mono(&clip.samples, clip.channels);

    let width = width.max(1);
    // Ceil division so the point count never exceeds the requested width;
    // the last chunk may come up short.
    let chunk_len = ((mono.len() + width - 1) / width).max(1);

    let points = mono
        .chunks(chunk_len)
        .map(|chunk| chunk.iter().map(|s| s.abs()).sum::<f32>() / chunk.len() as f32)
        .collect();

    WaveformData {
        points,
        duration: clip.duration_seconds(),
    }
}

fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().copied().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::clip::stub_clip;
    use tempfile::tempdir;

    #[test]
    fn silence_yields_all_zero_points() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        stub_clip(2_000, 8_000, 1).write_wav(&path).unwrap();

        let waveform = sample(&path, 800).unwrap();
        assert!(!waveform.points.is_empty());
        assert!(waveform.points.len() <= 800);
        assert!(waveform.points.iter().all(|p| *p == 0.0));
        assert!((waveform.duration - 2.0).abs() < 0.01);
    }

    #[test]
    fn point_count_tracks_requested_width() {
        // 16k mono frames split evenly into 800 chunks of 20.
        let clip = stub_clip(2_000, 8_000, 2);
        assert_eq!(from_clip(&clip, 800).points.len(), 800);

        // An uneven frame count lands at or under the requested width.
        let cd = stub_clip(1_000, 44_100, 2);
        assert!(from_clip(&cd, 800).points.len() <= 800);

        // Fewer frames than requested points: one point per frame.
        let tiny = stub_clip(10, 1_000, 1);
        assert_eq!(from_clip(&tiny, 800).points.len(), 10);
    }

    #[test]
    fn stereo_frames_are_averaged() {
        let clip = AudioClip {
            samples: vec![1.0, -1.0, 0.5, 0.5, -0.25, -0.75],
            sample_rate: 3,
            channels: 2,
            sample_width: 2,
        };

        let waveform = from_clip(&clip, 3);
        assert_eq!(waveform.points, vec![0.0, 0.5, 0.5]);
        assert!((waveform.duration - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unreadable_file_is_an_error() {
        assert!(sample(Path::new("/no/such/file.mp3"), 800).is_err());
    }
}
