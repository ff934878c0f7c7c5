//! Audio decoding
//!
//! Decodes in-memory bytes into mono f32 samples for playback and analysis.
//! WAV is read with hound, compressed formats with symphonia.

use crate::error::{MediaError, Result};
use std::io::Cursor;
use std::sync::Arc;

/// Decoded PCM ready for playback. Cloning shares the sample buffer.
#[derive(Clone, Debug)]
pub struct DecodedAudio {
    samples: Arc<[f32]>,
    sample_rate: u32,
    /// Channel count of the source before downmixing
    channels: u16,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate: sample_rate.max(1),
            channels,
        }
    }

    pub fn samples(&self) -> &Arc<[f32]> {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Total duration in seconds
    pub fn duration(&self) -> f64 {
        duration_seconds(self.samples.len(), self.sample_rate)
    }

    /// Sample index of a time position, clamped to the buffer
    pub fn frame_at(&self, seconds: f64) -> usize {
        let frame = (seconds.max(0.0) * self.sample_rate as f64) as usize;
        frame.min(self.samples.len())
    }

    /// RMS bars across the whole buffer for an overview display
    pub fn waveform(&self, num_bars: usize) -> Vec<f32> {
        if num_bars == 0 {
            return Vec::new();
        }
        let samples_per_bar = self.samples.len() / num_bars;
        (0..num_bars)
            .map(|i| {
                let start = i * samples_per_bar;
                let end = ((i + 1) * samples_per_bar).min(self.samples.len());
                if start < end {
                    super::analyser::calculate_rms(&self.samples[start..end])
                } else {
                    0.0
                }
            })
            .collect()
    }
}

/// Get duration of samples in seconds
pub fn duration_seconds(sample_count: usize, sample_rate: u32) -> f64 {
    sample_count as f64 / sample_rate.max(1) as f64
}

/// Decode audio bytes, downmixing every channel to mono. WAV goes through
/// hound; anything else is probed with symphonia (MP3, FLAC, Ogg Vorbis).
pub fn decode(bytes: &[u8]) -> Result<DecodedAudio> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        decode_wav(bytes)
    } else {
        decode_compressed(bytes)
    }
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| MediaError::Decode(format!("Unrecognized audio data: {}", e)))?;

    let spec = reader.spec();
    let channels = spec.channels.max(1);

    let interleaved: std::result::Result<Vec<f32>, _> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect(),
        hound::SampleFormat::Int => {
            // Convert integer samples to float
            let bits = spec.bits_per_sample.clamp(1, 32);
            let max_value = (1u64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect()
        }
    };

    let interleaved =
        interleaved.map_err(|e| MediaError::Decode(format!("Failed to read samples: {}", e)))?;

    downmix(interleaved, spec.sample_rate, channels)
}

pub(crate) fn decode_compressed(bytes: &[u8]) -> Result<DecodedAudio> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| MediaError::Decode(format!("Unrecognized audio data: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| MediaError::Decode("No audio track found".into()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| MediaError::Decode("Stream has no sample rate".into()))?;
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| MediaError::Decode(format!("Unsupported codec: {}", e)))?;

    let mut interleaved: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(MediaError::Decode(format!("Failed to read packet: {}", e))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // A corrupt frame is skipped, not fatal
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(MediaError::Decode(format!("Failed to decode packet: {}", e))),
        };

        let spec = *decoded.spec();
        channels = spec.channels.count() as u16;
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buffer.samples());
    }

    downmix(interleaved, sample_rate, channels.max(1))
}

fn downmix(interleaved: Vec<f32>, sample_rate: u32, channels: u16) -> Result<DecodedAudio> {
    if interleaved.len() < channels as usize {
        return Err(MediaError::Decode("Audio contains no samples".into()));
    }

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(DecodedAudio::new(samples, sample_rate, channels))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a 16-bit mono WAV of a sine tone
    pub(crate) fn sine_wav(seconds: f64, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let n = (seconds * sample_rate as f64) as usize;
            for i in 0..n {
                let t = i as f64 / sample_rate as f64;
                let v = (t * 440.0 * std::f64::consts::TAU).sin() * 0.5;
                writer.write_sample((v * i16::MAX as f64) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_duration_calculation() {
        assert_eq!(duration_seconds(16000, 16000), 1.0);
        assert_eq!(duration_seconds(32000, 16000), 2.0);
        assert_eq!(duration_seconds(8000, 16000), 0.5);
    }

    #[test]
    fn test_decode_mono_int() {
        let audio = decode(&sine_wav(2.0, 8000)).unwrap();
        assert_eq!(audio.sample_rate(), 8000);
        assert_eq!(audio.channels(), 1);
        assert!((audio.duration() - 2.0).abs() < 1e-9);
        assert!(audio.samples().iter().all(|s| s.abs() <= 0.51));
    }

    #[test]
    fn test_decode_stereo_float_downmix() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 4000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..4000 {
                writer.write_sample(1.0f32).unwrap();
                writer.write_sample(0.0f32).unwrap();
            }
            writer.finalize().unwrap();
        }

        let audio = decode(&cursor.into_inner()).unwrap();
        assert_eq!(audio.channels(), 2);
        assert_eq!(audio.samples().len(), 4000);
        assert!(audio.samples().iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(b"ID3\x03\x00not really audio").unwrap_err();
        assert!(matches!(err, MediaError::Decode(_)));
    }

    #[test]
    fn test_non_wav_bytes_go_through_symphonia() {
        // Same stream read by the compressed-format path
        let audio = decode_compressed(&sine_wav(1.5, 8000)).unwrap();
        assert_eq!(audio.sample_rate(), 8000);
        assert_eq!(audio.channels(), 1);
        assert!((audio.duration() - 1.5).abs() < 1e-3);

        let err = decode(b"OggS but truncated").unwrap_err();
        assert!(matches!(err, MediaError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_empty_wav() {
        let err = decode(&sine_wav(0.0, 8000)).unwrap_err();
        assert!(matches!(err, MediaError::Decode(_)));
    }

    #[test]
    fn test_waveform_bars() {
        let audio = decode(&sine_wav(1.0, 8000)).unwrap();
        let bars = audio.waveform(96);
        assert_eq!(bars.len(), 96);
        // 0.5 amplitude sine has RMS ~0.354
        assert!(bars.iter().all(|b| (b - 0.354).abs() < 0.05));
    }
}
