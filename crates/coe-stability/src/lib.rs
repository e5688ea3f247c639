//! COE Stability - defer verification until writes settle
//!
//! A [`StabilityGate`] tracks any number of independent sessions, each
//! watching a list of files. A session resolves once no change to its files
//! has been reported for a quiet period, or unconditionally once its maximum
//! wait has elapsed. [`FileWatcher`] feeds file-system events into the gate.

mod gate;
mod watcher;

pub use gate::{SessionId, StabilityEvent, StabilityGate, StabilityOutcome, StabilitySession};
pub use watcher::FileWatcher;
