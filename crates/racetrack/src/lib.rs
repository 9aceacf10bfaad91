//! Racetrack trace replay.
//!
//! Reads text event traces and feeds them through a
//! [`racetrack_core::Detector`], collecting the races and warnings it reports.
//!
//! ```
//! use racetrack::{Trace, replay};
//! use racetrack_core::DetectorConfig;
//!
//! let trace: Trace = "fork 1 2\nfork 1 3\nwrite 2 0x10\nwrite 3 0x10\n".parse().unwrap();
//! let report = replay(&trace, DetectorConfig::default()).unwrap();
//! assert_eq!(report.races.len(), 1);
//! ```

mod error;
pub mod metrics;
mod replay;
mod trace;

pub use error::*;
pub use replay::*;
pub use trace::*;
