//! Detection Session
//!
//! Caller-owned detection loop: one detector step per frame, a cooperative stop
//! signal checked at frame boundaries and a shared "current key" cell.

use log::{debug, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

use crate::note_table::NoteTable;
use crate::pitch_detector::PitchDetector;

/// Cooperative stop request, shared between the loop and whoever ends it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// A signal that has not been raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop before its next frame.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The most recent detection, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct CurrentKey(Arc<Mutex<Option<String>>>);

impl CurrentKey {
    /// An empty cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// The note detected on the last processed frame, if any.
    pub fn get(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, key: Option<&str>) {
        let mut current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_deref() != key {
            *current = key.map(str::to_owned);
        }
    }
}

/// Counters reported when a session loop ends.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSummary {
    /// Frames the detector processed.
    pub frames: usize,
    /// Frames that produced a note.
    pub detections: usize,
    /// Frames skipped because of invalid input.
    pub rejected: usize,
    /// Whether the loop ended on a stop request rather than running out of frames.
    pub stopped: bool,
    /// Smoothed noise threshold when the loop ended.
    pub smoothed_threshold: f64,
}

/// An active detection session.
pub struct Session {
    detector: PitchDetector,
    sample_rate: f64,
    stop: StopSignal,
    current_key: CurrentKey,
}

impl Session {
    /// Start `detector` against `table` for frames sampled at `sample_rate` Hz.
    pub fn new(mut detector: PitchDetector, table: NoteTable, sample_rate: f64) -> Self {
        debug!(
            "starting session: {} notes, {} bins at {sample_rate} Hz",
            table.len(),
            detector.bin_count()
        );
        detector.start(table);
        Session {
            detector,
            sample_rate,
            stop: StopSignal::new(),
            current_key: CurrentKey::new(),
        }
    }

    /// Handle for ending the loop from elsewhere.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Handle for reading the current key from elsewhere.
    pub fn current_key(&self) -> CurrentKey {
        self.current_key.clone()
    }

    /// Drive the detector once per frame until `frames` runs out or a stop is
    /// requested, then tear the session down.
    ///
    /// The stop signal is checked before each frame, so a frame already being
    /// processed always completes and is reported. Invalid frames are logged
    /// and skipped.
    pub fn run<I, F>(mut self, frames: I, mut on_detection: F) -> SessionSummary
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
        F: FnMut(Option<&str>),
    {
        let mut summary = SessionSummary::default();

        for frame in frames {
            if self.stop.is_stop_requested() {
                summary.stopped = true;
                break;
            }
            match self.detector.process_frame(frame.as_ref(), self.sample_rate) {
                Ok(detected) => {
                    summary.frames += 1;
                    if detected.is_some() {
                        summary.detections += 1;
                    }
                    self.current_key.set(detected);
                    on_detection(detected);
                }
                Err(e) => {
                    summary.rejected += 1;
                    warn!("skipping frame: {e}");
                }
            }
        }

        summary.smoothed_threshold = self
            .detector
            .state()
            .map_or(0.0, |state| state.smoothed_threshold());
        self.detector.stop();
        debug!("session ended: {summary:?}");
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn frame(noise: u8, peak_bin: usize) -> Vec<u8> {
        let mut f = vec![0u8; 1024];
        f[5] = noise;
        f[6] = noise;
        f[peak_bin] = 255;
        f
    }

    #[test]
    fn reports_every_frame_and_tracks_current_key() {
        init_logger();
        let session = Session::new(PitchDetector::new(), NoteTable::piano(), 44_100.0);
        let current = session.current_key();
        let frames = vec![frame(200, 10), frame(0, 10), frame(200, 12)];

        let mut seen = Vec::new();
        let summary = session.run(frames, |key| seen.push(key.map(str::to_owned)));

        // bin 12 -> 516.80 Hz, 6.45 Hz below C5
        assert_eq!(seen, vec![Some("A4".into()), None, Some("C5".into())]);
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.detections, 2);
        assert_eq!(summary.rejected, 0);
        assert!(!summary.stopped);
        assert_eq!(current.get(), Some("C5".into()));
    }

    #[test]
    fn invalid_frames_are_skipped() {
        init_logger();
        let session = Session::new(PitchDetector::new(), NoteTable::piano(), 44_100.0);
        let frames = vec![frame(200, 10), vec![0u8; 3], frame(200, 10)];

        let mut count = 0;
        let summary = session.run(frames, |_| count += 1);

        assert_eq!(count, 2);
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.rejected, 1);
    }

    #[test]
    fn stop_is_observed_at_next_frame() {
        init_logger();
        let session = Session::new(PitchDetector::new(), NoteTable::piano(), 44_100.0);
        let stop = session.stop_signal();
        let current = session.current_key();
        let frames = std::iter::repeat_with(|| frame(200, 10)).take(100);

        let mut seen = 0;
        let summary = session.run(frames, |key| {
            seen += 1;
            assert_eq!(key, Some("A4"));
            if seen == 3 {
                stop.request_stop();
            }
        });

        assert_eq!(seen, 3);
        assert_eq!(summary.frames, 3);
        assert!(summary.stopped);
        assert_eq!(current.get(), Some("A4".into()));
    }

    #[test]
    fn stop_before_run_processes_nothing() {
        let session = Session::new(PitchDetector::new(), NoteTable::piano(), 44_100.0);
        session.stop_signal().request_stop();
        let summary = session.run(vec![frame(200, 10)], |_| panic!("no frame expected"));
        assert_eq!(summary.frames, 0);
        assert!(summary.stopped);
    }

    #[test]
    fn summary_reports_smoothed_threshold() {
        let session = Session::new(PitchDetector::new(), NoteTable::piano(), 44_100.0);
        let summary = session.run(vec![frame(200, 10)], |_| {});
        assert!((summary.smoothed_threshold - 4.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_sample_rate_rejects_every_frame() {
        init_logger();
        let session = Session::new(PitchDetector::new(), NoteTable::piano(), 0.0);
        let current = session.current_key();
        let summary = session.run(vec![frame(200, 10), frame(200, 10)], |_| {});
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.frames, 0);
        assert_eq!(current.get(), None);
    }
}
