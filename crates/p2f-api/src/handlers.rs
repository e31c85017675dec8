//! Request handlers.

pub mod admin;
pub mod generate;
pub mod health;
pub mod media;
pub mod stats;

pub use health::*;
