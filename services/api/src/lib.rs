//! services/api/src/lib.rs
//!
//! The API service library: configuration, the concrete port adapters, and
//! the web layer (REST + WebSocket) built on top of the `study_core` crate.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
