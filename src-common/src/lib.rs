//! PlotCam Common Library
//!
//! Shared types, the frame ring and the control-channel protocol used by the
//! PlotCam console and its capture worker.

pub mod ipc;
pub mod logging;
pub mod ring;
pub mod security;
pub mod types;

pub use types::*;
