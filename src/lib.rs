//! Real-time LED tape-light signal engine.
//!
//! Moving gradient segments are composited per effect, one effect is live
//! per scene, one scene is live in the manager, and the manager's frames
//! stream to hardware as packed UDP datagrams. A UDP control plane mutates
//! everything at runtime.

pub mod config;
pub mod control;
pub mod error;
pub mod model;
pub mod net;
pub mod output;
pub mod persist;
pub mod state;

pub use error::AppError;
