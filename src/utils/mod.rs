//! Export contents of `utils` folder
#[allow(clippy::module_inception)]
mod utils;

pub use self::utils::*;
