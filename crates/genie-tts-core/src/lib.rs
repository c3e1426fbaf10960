//! Core types, config, errors, and per-session state for Genie TTS.

pub mod config;
pub mod error;
pub mod session;
pub mod types;
