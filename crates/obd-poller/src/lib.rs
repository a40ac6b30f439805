//! OBD-II Sensor Poller
//!
//! Queries a fixed set of sensors on an interval and publishes each round as
//! a [`PollSnapshot`], the feed a dashboard front-end redraws from.

mod poller;

pub use poller::{PollSnapshot, PollerConfig, PollerError, Sample, SensorPoller};
