//! Frequency Analyser
//!
//! Turns blocks of time-domain samples into byte spectra (`0..=255` per bin),
//! the frame format consumed by [`PitchDetector`](crate::PitchDetector).
//!
//! Each block is Blackman windowed, transformed, normalized by the FFT size,
//! smoothed against the previous block and mapped from a decibel range onto
//! the byte range.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::{f32::consts::PI, sync::Arc};
use thiserror::Error;

const MIN_FFT_SIZE: usize = 32;
const MAX_FFT_SIZE: usize = 32_768;

/// Blackman window alpha.
const BLACKMAN_ALPHA: f32 = 0.16;

/// Errors returned by the analyser.
#[derive(Debug, Error, PartialEq)]
pub enum AnalyserError {
    /// Block received was not of the configured FFT size.
    #[error("expected block of length {expected}, got {got}")]
    InvalidBlockSize {
        /// The configured FFT size.
        expected: usize,
        /// The length of the block received.
        got: usize,
    },

    /// An error occurred during the configuration of the analyser.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Builder for a `FrequencyAnalyser`.
pub struct FrequencyAnalyserBuilder {
    fft_size: usize,
    smoothing_time_constant: f32,
    min_decibels: f32,
    max_decibels: f32,
}

impl FrequencyAnalyserBuilder {
    /// Start with default parameters:
    /// fft_size = 2048, smoothing_time_constant = 0.8,
    /// min_decibels = -100, max_decibels = -30.
    pub fn new() -> Self {
        FrequencyAnalyserBuilder {
            fft_size: 2048,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }

    /// Set the FFT size. Must be a power of two between 32 and 32768.
    pub fn fft_size(mut self, size: usize) -> Self {
        self.fft_size = size;
        self
    }

    /// Set how much of the previous spectrum is kept (0.0 disables smoothing).
    pub fn smoothing_time_constant(mut self, value: f32) -> Self {
        self.smoothing_time_constant = value;
        self
    }

    /// Set the level mapped to byte 0.
    pub fn min_decibels(mut self, db: f32) -> Self {
        self.min_decibels = db;
        self
    }

    /// Set the level mapped to byte 255.
    pub fn max_decibels(mut self, db: f32) -> Self {
        self.max_decibels = db;
        self
    }

    /// Finalize and create the analyser.
    pub fn build(self) -> Result<FrequencyAnalyser, AnalyserError> {
        if !self.fft_size.is_power_of_two()
            || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&self.fft_size)
        {
            return Err(AnalyserError::Configuration(format!(
                "fft_size must be a power of two in {MIN_FFT_SIZE}..={MAX_FFT_SIZE}, got {}",
                self.fft_size
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing_time_constant) {
            return Err(AnalyserError::Configuration(
                "smoothing_time_constant must be within 0..=1".into(),
            ));
        }
        let has_range = self.min_decibels < self.max_decibels;
        if !has_range {
            return Err(AnalyserError::Configuration(
                "min_decibels must be below max_decibels".into(),
            ));
        }

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(self.fft_size);
        let bin_count = self.fft_size / 2;

        Ok(FrequencyAnalyser {
            fft,
            window: blackman_window(self.fft_size),
            fft_buffer: vec![Complex { re: 0.0, im: 0.0 }; self.fft_size],
            smoothed: vec![0.0; bin_count],
            bytes: vec![0; bin_count],
            fft_size: self.fft_size,
            smoothing_time_constant: self.smoothing_time_constant,
            min_decibels: self.min_decibels,
            max_decibels: self.max_decibels,
        })
    }
}

impl Default for FrequencyAnalyserBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Streaming byte-spectrum analyser.
pub struct FrequencyAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    fft_buffer: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    bytes: Vec<u8>,
    fft_size: usize,
    smoothing_time_constant: f32,
    min_decibels: f32,
    max_decibels: f32,
}

impl FrequencyAnalyser {
    /// Start customizing with a builder.
    pub fn builder() -> FrequencyAnalyserBuilder {
        FrequencyAnalyserBuilder::new()
    }

    /// Number of samples each block must have.
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of bins in each produced frame, half the FFT size.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Forget the smoothing history.
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }

    /// Analyse one block of `fft_size` samples and return its byte spectrum.
    pub fn analyse(&mut self, block: &[f32]) -> Result<&[u8], AnalyserError> {
        if block.len() != self.fft_size {
            return Err(AnalyserError::InvalidBlockSize {
                expected: self.fft_size,
                got: block.len(),
            });
        }

        self.compute_spectrum(block);
        self.smooth_magnitudes();
        self.convert_to_bytes();
        Ok(&self.bytes)
    }

    #[inline]
    fn compute_spectrum(&mut self, block: &[f32]) {
        for ((slot, &sample), &w) in self.fft_buffer.iter_mut().zip(block).zip(&self.window) {
            *slot = Complex {
                re: sample * w,
                im: 0.0,
            };
        }
        self.fft.process(&mut self.fft_buffer);
    }

    #[inline]
    fn smooth_magnitudes(&mut self) {
        let tau = self.smoothing_time_constant;
        let scale = 1.0 / self.fft_size as f32;
        for (prev, c) in self.smoothed.iter_mut().zip(&self.fft_buffer) {
            let magnitude = c.norm() * scale;
            let next = tau * *prev + (1.0 - tau) * magnitude;
            *prev = if next.is_finite() { next } else { 0.0 };
        }
    }

    #[inline]
    fn convert_to_bytes(&mut self) {
        let range_scale = 255.0 / (self.max_decibels - self.min_decibels);
        for (byte, &magnitude) in self.bytes.iter_mut().zip(&self.smoothed) {
            let db = 20.0 * magnitude.log10();
            let scaled = range_scale * (db - self.min_decibels);
            // -inf for silent bins clamps to 0
            *byte = scaled.clamp(0.0, 255.0) as u8;
        }
    }
}

/// Blackman window over `size` samples.
fn blackman_window(size: usize) -> Vec<f32> {
    let a0 = 0.5 * (1.0 - BLACKMAN_ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * BLACKMAN_ALPHA;
    (0..size)
        .map(|n| {
            let x = n as f32 / size as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amplitude: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| amplitude * (2.0 * PI * freq * n as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn default_shape() {
        let analyser = FrequencyAnalyser::builder().build().unwrap();
        assert_eq!(analyser.fft_size(), 2048);
        assert_eq!(analyser.bin_count(), 1024);
    }

    #[test]
    fn silence_is_all_zero() {
        let mut analyser = FrequencyAnalyser::builder().build().unwrap();
        let frame = analyser.analyse(&[0.0; 2048]).unwrap();
        assert!(frame.iter().all(|&b| b == 0));
    }

    #[test]
    fn tone_peaks_at_its_bin() {
        let mut analyser = FrequencyAnalyser::builder()
            .smoothing_time_constant(0.0)
            .build()
            .unwrap();
        // 44100 / 2048 Hz per bin; 1378.125 Hz sits exactly on bin 64
        let block = sine(1378.125, 0.02, 44_100.0, 2048);
        let frame = analyser.analyse(&block).unwrap();
        let peak = frame
            .iter()
            .enumerate()
            .max_by_key(|&(i, &b)| (b, std::cmp::Reverse(i)))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 64);
        assert!(frame[64] > 150 && frame[64] < 255);
    }

    #[test]
    fn loud_tone_saturates() {
        let mut analyser = FrequencyAnalyser::builder()
            .smoothing_time_constant(0.0)
            .build()
            .unwrap();
        let block = sine(1378.125, 1.0, 44_100.0, 2048);
        assert_eq!(analyser.analyse(&block).unwrap()[64], 255);
    }

    #[test]
    fn smoothing_ramps_up_and_reset_clears() {
        let mut analyser = FrequencyAnalyser::builder().build().unwrap();
        let block = sine(1378.125, 0.02, 44_100.0, 2048);
        let first = analyser.analyse(&block).unwrap()[64];
        let second = analyser.analyse(&block).unwrap()[64];
        assert!(second > first);

        analyser.reset();
        assert_eq!(analyser.analyse(&block).unwrap()[64], first);
    }

    #[test]
    fn rejects_wrong_block_size() {
        let mut analyser = FrequencyAnalyser::builder().build().unwrap();
        assert_eq!(
            analyser.analyse(&[0.0; 1024]),
            Err(AnalyserError::InvalidBlockSize {
                expected: 2048,
                got: 1024
            })
        );
    }

    #[test]
    fn rejects_bad_configuration() {
        for size in [0, 31, 100, 65_536] {
            assert!(FrequencyAnalyser::builder().fft_size(size).build().is_err());
        }
        assert!(FrequencyAnalyser::builder()
            .smoothing_time_constant(1.5)
            .build()
            .is_err());
        assert!(FrequencyAnalyser::builder()
            .min_decibels(-30.0)
            .max_decibels(-100.0)
            .build()
            .is_err());
    }
}
