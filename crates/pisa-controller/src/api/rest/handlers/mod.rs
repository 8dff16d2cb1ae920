//! API request handlers

mod probes;
mod resources;

pub use probes::*;
pub use resources::*;
