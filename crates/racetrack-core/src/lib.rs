//! Dynamic data race detection.
//!
//! The detector consumes a stream of thread lifecycle, synchronization,
//! call-stack and memory access events and reports every pair of
//! conflicting accesses that is not ordered by happens-before.
//!
//! ```
//! use racetrack_core::{Detector, DetectorConfig, ThreadId};
//! use std::sync::{Arc, Mutex};
//!
//! let detector = Detector::new();
//! let races = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&races);
//! detector
//!     .init(DetectorConfig::default(), move |race| sink.lock().unwrap().push(race.clone()))
//!     .unwrap();
//!
//! let t2 = detector.fork(ThreadId(1), ThreadId(2)).unwrap();
//! let t3 = detector.fork(ThreadId(1), ThreadId(3)).unwrap();
//! detector.write(&t2, 0x1000, 0, 4).unwrap();
//! detector.write(&t3, 0x1000, 0, 4).unwrap();
//! detector.finalize().unwrap();
//!
//! assert_eq!(races.lock().unwrap().len(), 1);
//! ```

mod config;
pub mod engine;
mod error;
mod handle;
mod hb;
pub mod metrics;
mod report;
mod session;
mod shadow;
mod stats;
mod thread;
mod warning;

pub use config::*;
pub use engine::{Conflict, Outcome, RaceKind};
pub use error::*;
pub use handle::*;
pub use hb::*;
pub use report::*;
pub use session::*;
pub use shadow::*;
pub use stats::*;
pub use thread::*;
pub use warning::*;

pub use racetrack_clock::{Clock, Epoch, ThreadNum, VectorClock};
