//! Match history recording

pub mod recorder;

pub use recorder::{HistoryRecorder, MatchResolution};
