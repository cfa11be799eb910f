//! Rig-backed runtime for the `coordination` council.
//!
//! Supplies the concrete collaborators a session needs: an OpenAI-compatible
//! generation backend, a directory knowledge store and an in-memory section
//! store, plus configuration loading and session records.

pub mod backend;
pub mod config;
pub mod documents;
pub mod knowledge;
pub mod session;
pub mod telemetry;
