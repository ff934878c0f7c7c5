//! Frequency analysis tap placed after the gain stage
//!
//! Outputs push rendered samples into a sliding window; the visualiser loop
//! reads byte-scaled magnitudes from it.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Magnitudes below this map to 0
const MIN_DECIBELS: f32 = -100.0;
/// Magnitudes above this map to 255
const MAX_DECIBELS: f32 = -30.0;
/// Weight of the previous frame when smoothing
const SMOOTHING: f32 = 0.8;
/// Largest window the visualiser analyses; the transform is quadratic in it
pub const MAX_FFT_SIZE: usize = 2048;

pub struct Analyser {
    fft_size: usize,
    /// Blackman coefficients, one per window slot
    blackman: Vec<f32>,
    /// cos/sin of TAU * j / n for j in 0..n
    twiddles: Vec<(f32, f32)>,
    inner: Mutex<AnalyserInner>,
}

struct AnalyserInner {
    window: VecDeque<f32>,
    smoothed: Vec<f32>,
}

impl Analyser {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.clamp(32, MAX_FFT_SIZE).next_power_of_two();
        let step = std::f32::consts::TAU / fft_size as f32;
        Self {
            fft_size,
            blackman: (0..fft_size)
                .map(|i| {
                    let x = step * i as f32;
                    0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
                })
                .collect(),
            twiddles: (0..fft_size)
                .map(|j| {
                    let angle = step * j as f32;
                    (angle.cos(), angle.sin())
                })
                .collect(),
            inner: Mutex::new(AnalyserInner {
                window: VecDeque::with_capacity(fft_size),
                smoothed: vec![0.0; fft_size / 2],
            }),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Feed rendered output, keeping only the last `fft_size` samples
    pub fn push(&self, samples: &[f32]) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let tail = &samples[samples.len().saturating_sub(self.fft_size)..];
        let overflow = (inner.window.len() + tail.len()).saturating_sub(self.fft_size);
        inner.window.drain(..overflow);
        inner.window.extend(tail.iter().copied());
    }

    /// Drop buffered samples and smoothing history
    pub fn reset(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.window.clear();
            inner.smoothed.iter_mut().for_each(|v| *v = 0.0);
        }
    }

    /// Byte-scaled magnitude per frequency bin (0..=255)
    pub fn byte_frequency_data(&self) -> Vec<u8> {
        let Ok(mut inner) = self.inner.lock() else {
            return vec![0; self.bin_count()];
        };

        let n = self.fft_size;
        let mut frame = vec![0.0f32; n];
        // Right-align so a short window reads as leading silence
        let start = n - inner.window.len();
        for (slot, &s) in frame[start..].iter_mut().zip(inner.window.iter()) {
            *slot = s;
        }
        for (s, w) in frame.iter_mut().zip(&self.blackman) {
            *s *= w;
        }

        let magnitudes = dft_magnitudes(&frame, &self.twiddles);
        let range = MAX_DECIBELS - MIN_DECIBELS;
        inner
            .smoothed
            .iter_mut()
            .zip(magnitudes)
            .map(|(prev, mag)| {
                *prev = SMOOTHING * *prev + (1.0 - SMOOTHING) * mag;
                let db = 20.0 * prev.max(1e-12).log10();
                (((db - MIN_DECIBELS) / range) * 255.0).clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

/// Normalised magnitude of the first n/2 bins
fn dft_magnitudes(frame: &[f32], twiddles: &[(f32, f32)]) -> Vec<f32> {
    let n = frame.len();
    (0..n / 2)
        .map(|k| {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (i, &s) in frame.iter().enumerate() {
                let (cos, sin) = twiddles[k * i % n];
                re += s * cos;
                im -= s * sin;
            }
            (re * re + im * im).sqrt() / n as f32
        })
        .collect()
}

/// Calculate RMS volume from samples
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
