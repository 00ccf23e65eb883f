//! HTTP API module for the mini-app surface.
//!
//! Exposes the JSON endpoints the web mini-app talks to. Every state-changing
//! endpoint authenticates via the signed init-data header.

mod server;

pub use server::{AppState, INIT_DATA_HEADER, TaskView, serve};
