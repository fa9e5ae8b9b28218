//! # key_detector
//!
//! Frame-driven detection of the dominant piano key: gate each byte spectrum on
//! its low-frequency background noise, take the loudest bin and match it to the
//! nearest note of an equal-tempered table.
//!
//! ## Example
//! ```rust
//! use key_detector::{FrequencyAnalyser, NoteTable, PitchDetector};
//!
//! fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1) Build the 88-key table once (A0..=C8, A4 = 440 Hz)
//!     let table = NoteTable::build("A4", 440.0, "A0", "C8")?;
//!
//!     // 2) Turn time-domain blocks into byte spectra
//!     let mut analyser = FrequencyAnalyser::builder().fft_size(2048).build()?;
//!
//!     // 3) Start a detector session
//!     let mut detector = PitchDetector::builder()
//!         .bin_count(analyser.bin_count())
//!         .build()?;
//!     detector.start(table);
//!
//!     // 4) In your audio loop:
//!     let block: Vec<f32> = vec![0.0; 2048]; // fill with actual samples
//!     let frame = analyser.analyse(&block)?;
//!     match detector.process_frame(frame, 44_100.0)? {
//!         Some(key) => println!("Detected piano key: {key}"),
//!         None => println!("Listening..."),
//!     }
//!
//!     detector.stop();
//!     Ok(())
//! }
//! # run().unwrap();
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rust_2018_idioms)]
#![deny(clippy::all)]

/// Equal-tempered note tables.
pub use note_table::{NoteFrequency, NoteTable, NoteTableError};

/// Per-frame pitch detector.
pub use pitch_detector::{
    ConfigError, DetectorError, DetectorState, PitchDetector, PitchDetectorBuilder,
};

/// Byte-spectrum analyser.
pub use analyser::{AnalyserError, FrequencyAnalyser, FrequencyAnalyserBuilder};

/// Caller-owned detection loop.
pub use session::{CurrentKey, Session, SessionSummary, StopSignal};

/// Note table module.
pub mod note_table;

/// Pitch detection module.
pub mod pitch_detector;

/// Spectrum analysis module.
pub mod analyser;

/// Detection session module.
pub mod session;
