//! Lexbridge - Dual-path text translation
//!
//! Translates text with a fast native engine when one is available, and falls
//! back to a locally hosted translation model served by an executor actor
//! whenever the native path is missing or fails.

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod languages;
pub mod native;
pub mod orchestrator;
pub mod protocol;
