use std::fs::File;
use std::path::Path;

use hound::WavWriter;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::errors::{AppError, Result};

/// Decoded audio held in memory: interleaved f32 samples in [-1, 1].
/// `sample_width` is the source's bytes-per-sample, kept for info reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_width: u16,
}

impl AudioClip {
    /// Decodes a whole media file through symphonia. Blocking; callers on
    /// the async runtime go through `spawn_blocking`.
    pub fn decode(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let mut format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| AppError::Media(format!("no audio track in {:?}", path)))?;

        let sample_width = track
            .codec_params
            .bits_per_sample
            .map(|bits| ((bits + 7) / 8).max(1) as u16)
            .unwrap_or(2);

        let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let mut samples: Vec<f32> = Vec::new();
        let mut sample_rate: u32 = 0;
        let mut channels: u16 = 0;

        while let Ok(packet) = format.next_packet() {
            let decoded = decoder.decode(&packet)?;
            sample_rate = decoded.spec().rate;
            channels = decoded.spec().channels.count() as u16;

            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
            buffer.copy_interleaved_ref(decoded);

            samples.extend_from_slice(buffer.samples());
        }

        if samples.is_empty() || sample_rate == 0 || channels == 0 {
            return Err(AppError::Media(format!("no decodable audio in {:?}", path)));
        }

        Ok(Self {
            samples,
            sample_rate,
            channels,
            sample_width,
        })
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn ms_to_sample_index(&self, ms: u64) -> usize {
        let frame = (ms * self.sample_rate as u64 / 1000) as usize;
        (frame * self.channels as usize).min(self.samples.len())
    }

    /// Copies out `[start_ms, end_ms)`, clamped to the clip bounds. An
    /// inverted or out-of-range window yields an empty clip.
    pub fn slice_ms(&self, start_ms: u64, end_ms: u64) -> Self {
        let start = self.ms_to_sample_index(start_ms);
        let end = self.ms_to_sample_index(end_ms).max(start);
        Self {
            samples: self.samples[start..end].to_vec(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            sample_width: self.sample_width,
        }
    }

    /// Appends another clip's samples. Only meaningful for clips cut from
    /// the same source; format agreement is the caller's job.
    pub fn append(&mut self, other: &AudioClip) {
        self.samples.extend_from_slice(&other.samples);
    }

    /// Inserts `other` at `position_ms`, shifting the tail right.
    pub fn splice_at(&mut self, position_ms: u64, other: &AudioClip) {
        let at = self.ms_to_sample_index(position_ms);
        let tail = self.samples.split_off(at);
        self.samples.extend_from_slice(&other.samples);
        self.samples.extend_from_slice(&tail);
    }

    /// Returns a copy conformed to the given rate and channel count.
    /// Channel changes mix through mono; rate changes interpolate
    /// linearly.
    pub fn conform_to(&self, sample_rate: u32, channels: u16) -> Self {
        if self.sample_rate == sample_rate && self.channels == channels {
            return self.clone();
        }

        let samples = if self.channels == channels {
            self.samples.clone()
        } else {
            remix(&self.samples, self.channels, channels)
        };
        let samples = if self.sample_rate == sample_rate {
            samples
        } else {
            resample(&samples, channels, self.sample_rate, sample_rate)
        };

        Self {
            samples,
            sample_rate,
            channels,
            sample_width: self.sample_width,
        }
    }

    /// Writes 16-bit PCM WAV. Blocking.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = WavWriter::create(path, spec)?;
        for sample in &self.samples {
            let s = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            writer.write_sample(s)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// Mixes interleaved frames down to mono and fans back out to `to`
/// channels.
fn remix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        let mono = frame.iter().sum::<f32>() / from as f32;
        for _ in 0..to {
            out.push(mono);
        }
    }
    out
}

/// Linear-interpolation resampler over interleaved frames.
fn resample(samples: &[f32], channels: u16, from: u32, to: u32) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    let src_frames = samples.len() / channels;
    if src_frames == 0 || from == 0 {
        return samples.to_vec();
    }

    let dst_frames = (src_frames as u64 * to as u64 / from as u64) as usize;
    let step = from as f64 / to as f64;
    let mut out = Vec::with_capacity(dst_frames * channels);
    for i in 0..dst_frames {
        let pos = i as f64 * step;
        let base = (pos as usize).min(src_frames - 1);
        let next = (base + 1).min(src_frames - 1);
        let frac = (pos - base as f64) as f32;
        for ch in 0..channels {
            let a = samples[base * channels + ch];
            let b = samples[next * channels + ch];
            out.push(a + (b - a) * frac);
        }
    }
    out
}

#[cfg(test)]
pub(crate) fn stub_clip(duration_ms: u64, sample_rate: u32, channels: u16) -> AudioClip {
    let frames = (duration_ms * sample_rate as u64 / 1000) as usize;
    AudioClip {
        samples: vec![0.0; frames * channels as usize],
        sample_rate,
        channels,
        sample_width: 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn duration_math_is_frame_based() {
        let clip = stub_clip(2_000, 44_100, 2);
        assert_eq!(clip.frames(), 88_200);
        assert_eq!(clip.duration_ms(), 2_000);
        assert!((clip.duration_seconds() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn slice_is_half_open_and_clamped() {
        let clip = stub_clip(1_000, 1_000, 1);
        assert_eq!(clip.slice_ms(0, 250).samples.len(), 250);
        assert_eq!(clip.slice_ms(900, 5_000).samples.len(), 100);
        assert!(clip.slice_ms(500, 500).is_empty());
        assert!(clip.slice_ms(800, 200).is_empty());
    }

    #[test]
    fn splice_inserts_in_the_middle() {
        let mut clip = stub_clip(100, 1_000, 1);
        let mut insert = stub_clip(10, 1_000, 1);
        for s in insert.samples.iter_mut() {
            *s = 0.5;
        }

        clip.splice_at(50, &insert);
        assert_eq!(clip.samples.len(), 110);
        assert_eq!(clip.samples[50], 0.5);
        assert_eq!(clip.samples[59], 0.5);
        assert_eq!(clip.samples[60], 0.0);
    }

    #[test]
    fn conform_remixes_channels_through_mono() {
        let stereo = AudioClip {
            samples: vec![1.0, 0.0, 0.5, 0.5],
            sample_rate: 8_000,
            channels: 2,
            sample_width: 2,
        };

        let mono = stereo.conform_to(8_000, 1);
        assert_eq!(mono.channels, 1);
        assert_eq!(mono.samples, vec![0.5, 0.5]);

        let back = mono.conform_to(8_000, 2);
        assert_eq!(back.samples, vec![0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn conform_resamples_without_changing_duration() {
        let clip = stub_clip(1_000, 8_000, 1);

        let up = clip.conform_to(16_000, 1);
        assert_eq!(up.sample_rate, 16_000);
        assert_eq!(up.samples.len(), 16_000);
        assert_eq!(up.duration_ms(), 1_000);

        let down = clip.conform_to(4_000, 2);
        assert_eq!(down.samples.len(), 8_000);
        assert_eq!(down.duration_ms(), 1_000);
    }

    #[test]
    fn wav_round_trip_through_symphonia() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let mut clip = stub_clip(500, 8_000, 1);
        for (i, s) in clip.samples.iter_mut().enumerate() {
            *s = (i as f32 * 0.05).sin() * 0.8;
        }
        clip.write_wav(&path).unwrap();

        let decoded = AudioClip::decode(&path).unwrap();
        assert_eq!(decoded.sample_rate, 8_000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.samples.len(), clip.samples.len());
        assert_eq!(decoded.sample_width, 2);
    }

    #[test]
    fn decode_rejects_non_media_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not_audio.wav");
        std::fs::write(&path, b"definitely not a wav file").unwrap();

        assert!(AudioClip::decode(&path).is_err());
    }
}
