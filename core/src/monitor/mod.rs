//! Monitoring subsystem: status polling, state timestamps, finalisation
//! of completed jobs, and the periodic driver.
//!
//! The `cycle` module runs one pass: credential check, batched poll,
//! per-job transition. `finalise` holds the continuation that settles
//! completed jobs. `driver` runs passes on a timer.

pub mod cycle;
pub mod driver;
pub mod finalise;
pub mod state_time;

pub use cycle::{CycleResult, MonitorLoop};
pub use driver::{AutoResubmit, DriverHandle, MonitorDriver};
pub use finalise::Finaliser;
