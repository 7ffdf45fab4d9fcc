//! Command handlers

pub mod cache;
pub mod config;
pub mod queue;
pub mod status;
pub mod sync;
