//! Per-device sessions: receive loop, processing worker and the manager that owns them
mod boundary_store;
mod detector;
mod device;
mod errors;
mod frame;
mod manager;
mod pipeline;
mod queue;
mod sink;

pub use self::{
    boundary_store::*,
    detector::*,
    device::SessionContext,
    errors::*,
    frame::*,
    manager::*,
    pipeline::*,
    queue::*,
    sink::*,
};
