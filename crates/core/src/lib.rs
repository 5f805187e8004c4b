//! Core business logic for livepoll-rs.

pub mod services;

pub use services::*;
