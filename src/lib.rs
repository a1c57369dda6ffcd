//! Tracks objects moving past a calibrated line in live camera frames and reports each
//! crossing as an `IN` or `OUT` event.
//!
//! - [`transport`]: length-prefixed frame stream from capture devices
//! - [`session`]: one isolated processing session per connected device
//! - [`mot`]: centroid tracker and boundary-crossing detector
pub mod config;
pub mod mot;
pub mod session;
pub mod transport;
pub mod utils;
