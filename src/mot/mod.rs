//! Export contents of `mot` folder
mod boundary;
mod centroid_tracker;
mod crossing;
mod detection;
mod mot_errors;
mod simple_queue;
mod tracked_object;

pub use self::{
    boundary::*,
    centroid_tracker::*,
    crossing::*,
    detection::*,
    mot_errors::*,
    simple_queue::*,
    tracked_object::*,
};
