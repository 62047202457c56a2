//! Core engine for Memorialize.
//!
//! Two pieces carry the weight here: face-anchored near-duplicate detection
//! for the photos attached to a record (`detector`, `dedup`), and the
//! publication run that moves records through their lifecycle exactly once
//! (`state`, `orchestrator`). Everything the run talks to outside the process
//! sits behind a small trait (`Publisher`, `Fingerprinter`, `Clock`,
//! `SignalSource`) and is injected by the caller.

pub mod caption;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod detector;
pub mod framing;
pub mod orchestrator;
pub mod progress;
pub mod publisher;
pub mod record;
pub mod reporting;
pub mod signal;
pub mod state;
pub mod store;

pub use caption::{build_caption, CaptionConfig};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AppConfig, ConfigError, PublisherConfig, DEFAULT_CONFIG_FILE};
pub use dedup::{filter_duplicates, DedupOutcome};
pub use detector::{
    hamming_distance, CascadeFaceLocator, DetectionError, DetectorConfig, FaceFingerprint,
    FaceFingerprinter, FaceLocator, FaceRegion, Fingerprinter, Profile, RegionDetector,
    CASCADE_PROFILES, DEFAULT_HASH_THRESHOLD,
};
pub use framing::{frame_square, square_window};
pub use orchestrator::{
    is_eligible, Orchestrator, RunContext, RunOptions, RunReport, RunSummary, SkipReason,
    StopCause, FAILURE_TOLERANCE,
};
pub use publisher::{OutboxPublisher, Pacing, PublishError, PublishReceipt, PublishRequest, Publisher};
pub use record::{CasualtyRecord, Gender, Timestamp};
pub use reporting::{format_summary, print_summary, write_json, ReportingError};
pub use signal::{InterruptFlag, NeverInterrupted, SignalSource};
pub use state::{RecordState, TransitionError};
pub use store::{load_records, save_records, StoreError};
