//! nbrequire: Dependency-Gated Execution for Notebook Cells
//!
//! Cells declare external module requirements; the engine loads them
//! asynchronously, gates user-script execution on their availability, and
//! captures outputs so they survive document reloads without the modules
//! being present.

pub mod comm;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod lifecycle;
pub mod loader;
pub mod logging;
pub mod notebook;
pub mod output;
pub mod poll;
pub mod sandbox;
pub mod types;
