//! mailguard: two-stage mail threat classifier.

pub mod channels;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod resources;
