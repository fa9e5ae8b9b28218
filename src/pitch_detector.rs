//! Pitch Detector
//!
//! Per-session conversion of byte spectra into note detections: background-noise
//! estimation, an absolute noise gate, single-peak selection and nearest-note
//! matching against a [`NoteTable`].

use log::trace;
use std::ops::RangeInclusive;
use thiserror::Error;

use crate::note_table::NoteTable;

const DEFAULT_BIN_COUNT: usize = 1024;
const DEFAULT_NOISE_GATE: f64 = 140.0;
const DEFAULT_THRESHOLD_RATIO: f64 = 0.20;
const DEFAULT_SMOOTHING: f64 = 0.1;
const DEFAULT_MATCH_TOLERANCE: f64 = 10.0;

/// Bins just above DC, where ambient hum shows up.
const DEFAULT_NOISE_BINS: RangeInclusive<usize> = 5..=6;

/// Errors when processing a frame
#[derive(Debug, Error, PartialEq)]
pub enum DetectorError {
    /// The frame did not have the configured number of bins.
    #[error("expected a {expected}-bin frame, got {got}")]
    InvalidFrameLength {
        /// The configured bin count.
        expected: usize,
        /// The length of the frame provided.
        got: usize,
    },

    /// The sample rate was zero, negative or not finite.
    #[error("invalid sample rate {0}")]
    InvalidSampleRate(f64),

    /// `process_frame` was called outside of a session.
    #[error("detector has not been started")]
    NotStarted,
}

impl DetectorError {
    /// Whether the error was caused by the frame or sample rate handed in.
    /// The session is unaffected and the caller may continue with the next frame.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            DetectorError::InvalidFrameLength { .. } | DetectorError::InvalidSampleRate(_)
        )
    }
}

/// Errors when configuring a detector
#[derive(Debug, Error, PartialEq)]
#[error("configuration error: {0}")]
pub struct ConfigError(String);

/// Noise-floor tracking for one session.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct DetectorState {
    smoothed_threshold: f64,
    last_background_noise: f64,
}

impl DetectorState {
    /// Exponentially smoothed noise threshold.
    ///
    /// Tracked every frame but not consulted by the noise gate, which compares
    /// the raw background noise against a fixed level.
    pub fn smoothed_threshold(&self) -> f64 {
        self.smoothed_threshold
    }

    /// Background noise measured on the most recent frame.
    pub fn last_background_noise(&self) -> f64 {
        self.last_background_noise
    }

    fn update(&mut self, background_noise: f64, ratio: f64, smoothing: f64) {
        let current_threshold = background_noise * ratio;
        self.smoothed_threshold =
            smoothing * current_threshold + (1.0 - smoothing) * self.smoothed_threshold;
        self.last_background_noise = background_noise;
    }
}

/// Builder for `PitchDetector`
pub struct PitchDetectorBuilder {
    bin_count: usize,
    noise_bins: RangeInclusive<usize>,
    noise_gate: f64,
    threshold_ratio: f64,
    smoothing: f64,
    match_tolerance: f64,
}

impl PitchDetectorBuilder {
    /// Start with default parameters:
    /// bin_count = 1024, noise_bins = 5..=6, noise_gate = 140,
    /// threshold_ratio = 0.20, smoothing = 0.1, match_tolerance = 10 Hz.
    pub fn new() -> Self {
        PitchDetectorBuilder {
            bin_count: DEFAULT_BIN_COUNT,
            noise_bins: DEFAULT_NOISE_BINS,
            noise_gate: DEFAULT_NOISE_GATE,
            threshold_ratio: DEFAULT_THRESHOLD_RATIO,
            smoothing: DEFAULT_SMOOTHING,
            match_tolerance: DEFAULT_MATCH_TOLERANCE,
        }
    }

    /// Set the number of bins every frame must have.
    pub fn bin_count(mut self, count: usize) -> Self {
        self.bin_count = count;
        self
    }

    /// Set the bins whose maximum is taken as the background noise.
    pub fn noise_bins(mut self, bins: RangeInclusive<usize>) -> Self {
        self.noise_bins = bins;
        self
    }

    /// Set the background noise level (0..=255) below which frames are ignored.
    pub fn noise_gate(mut self, level: f64) -> Self {
        self.noise_gate = level;
        self
    }

    /// Set the fraction of the background noise used as the frame threshold.
    pub fn threshold_ratio(mut self, ratio: f64) -> Self {
        self.threshold_ratio = ratio;
        self
    }

    /// Set the weight of the newest threshold in the exponential smoothing.
    pub fn smoothing(mut self, factor: f64) -> Self {
        self.smoothing = factor;
        self
    }

    /// Set the maximum distance in Hz between the peak and a matched note.
    pub fn match_tolerance(mut self, hz: f64) -> Self {
        self.match_tolerance = hz;
        self
    }

    /// Finalize and create the `PitchDetector`.
    pub fn build(self) -> Result<PitchDetector, ConfigError> {
        let (noise_lo, noise_hi) = self.noise_bins.into_inner();
        if noise_lo > noise_hi {
            return Err(ConfigError("noise_bins must not be empty".into()));
        }
        if noise_hi >= self.bin_count {
            return Err(ConfigError(format!(
                "noise_bins end {noise_hi} is outside a {}-bin frame",
                self.bin_count
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold_ratio) {
            return Err(ConfigError("threshold_ratio must be within 0..=1".into()));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(ConfigError("smoothing must be within 0..=1".into()));
        }
        if !self.noise_gate.is_finite() {
            return Err(ConfigError("noise_gate must be finite".into()));
        }
        if !(self.match_tolerance.is_finite() && self.match_tolerance > 0.0) {
            return Err(ConfigError("match_tolerance must be positive".into()));
        }

        Ok(PitchDetector {
            bin_count: self.bin_count,
            noise_lo,
            noise_hi,
            noise_gate: self.noise_gate,
            threshold_ratio: self.threshold_ratio,
            smoothing: self.smoothing,
            match_tolerance: self.match_tolerance,
            session: None,
        })
    }
}

impl Default for PitchDetectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Table and state owned by an active session.
struct Session {
    table: NoteTable,
    state: DetectorState,
}

/// Stateful single-note detector, driven once per frame.
pub struct PitchDetector {
    bin_count: usize,
    noise_lo: usize,
    noise_hi: usize,
    noise_gate: f64,
    threshold_ratio: f64,
    smoothing: f64,
    match_tolerance: f64,
    session: Option<Session>,
}

impl PitchDetector {
    /// Return a builder to customize the detector.
    pub fn builder() -> PitchDetectorBuilder {
        PitchDetectorBuilder::new()
    }

    /// Create a detector with the default parameters.
    pub fn new() -> Self {
        Self {
            bin_count: DEFAULT_BIN_COUNT,
            noise_lo: *DEFAULT_NOISE_BINS.start(),
            noise_hi: *DEFAULT_NOISE_BINS.end(),
            noise_gate: DEFAULT_NOISE_GATE,
            threshold_ratio: DEFAULT_THRESHOLD_RATIO,
            smoothing: DEFAULT_SMOOTHING,
            match_tolerance: DEFAULT_MATCH_TOLERANCE,
            session: None,
        }
    }

    /// Number of bins each frame must have.
    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Begin a session against `table`, with a fresh noise state.
    /// Starting an active detector discards the previous session.
    pub fn start(&mut self, table: NoteTable) {
        self.session = Some(Session {
            table,
            state: DetectorState::default(),
        });
    }

    /// End the session, discarding its state and table.
    pub fn stop(&mut self) {
        self.session = None;
    }

    /// Whether a session is active.
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Noise state of the active session.
    pub fn state(&self) -> Option<&DetectorState> {
        self.session.as_ref().map(|s| &s.state)
    }

    /// Note table of the active session.
    pub fn table(&self) -> Option<&NoteTable> {
        self.session.as_ref().map(|s| &s.table)
    }

    /// Process one byte spectrum sampled at `sample_rate` Hz.
    ///
    /// Returns `Ok(Some(name))` for a detected note and `Ok(None)` when the frame
    /// is below the noise gate or no note is close enough to its peak.
    ///
    /// Returns:
    /// - `Err(NotStarted)` outside of a session.
    /// - `Err(InvalidFrameLength)` if `frame.len() != bin_count`.
    /// - `Err(InvalidSampleRate)` if `sample_rate` is not positive and finite.
    ///
    /// Errors leave the session state untouched.
    pub fn process_frame(
        &mut self,
        frame: &[u8],
        sample_rate: f64,
    ) -> Result<Option<&str>, DetectorError> {
        let Some(session) = self.session.as_mut() else {
            return Err(DetectorError::NotStarted);
        };
        if frame.len() != self.bin_count {
            return Err(DetectorError::InvalidFrameLength {
                expected: self.bin_count,
                got: frame.len(),
            });
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(DetectorError::InvalidSampleRate(sample_rate));
        }

        // 1) background noise from the current frame
        let background_noise = frame[self.noise_lo..=self.noise_hi]
            .iter()
            .copied()
            .max()
            .unwrap_or(0) as f64;

        // 2) smoothed threshold, tracked only
        session
            .state
            .update(background_noise, self.threshold_ratio, self.smoothing);

        // 3) loudest bin
        let (peak_index, peak_amplitude) = peak_bin(frame);

        // 4) gate on the raw noise level
        if background_noise < self.noise_gate {
            trace!("noise {background_noise} below gate, peak bin {peak_index} ({peak_amplitude})");
            return Ok(None);
        }

        // 5) bin to Hz
        let frequency = sample_rate * peak_index as f64 / self.bin_count as f64;

        // 6) nearest note within tolerance
        let detected = match session.table.nearest(frequency) {
            Some((note, difference)) if difference < self.match_tolerance => {
                Some(note.name.as_str())
            }
            _ => None,
        };
        trace!(
            "noise {background_noise}, peak bin {peak_index} ({peak_amplitude}) = {frequency:.2} Hz -> {detected:?}"
        );
        Ok(detected)
    }
}

impl Default for PitchDetector {
    fn default() -> Self {
        PitchDetector::new()
    }
}

/// Index and amplitude of the loudest bin; the lowest index wins ties.
#[inline]
fn peak_bin(frame: &[u8]) -> (usize, u8) {
    let mut max_amplitude = 0;
    let mut max_index = 0;
    for (i, &amplitude) in frame.iter().enumerate() {
        if amplitude > max_amplitude {
            max_amplitude = amplitude;
            max_index = i;
        }
    }
    (max_index, max_amplitude)
}
