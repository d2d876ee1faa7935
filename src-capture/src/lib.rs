//! PlotCam capture worker.
//!
//! Runs in its own process, spawned by the console for each stream session.
//! Frames from the camera are written into the shared frame ring; save
//! requests arrive over an inherited control socket.

pub mod capture;
pub mod control;
pub mod save;
pub mod worker;

pub use save::{save_pair, SaveError, SaveOptions, SavedPaths};
pub use worker::{capture_loop, run_worker, WorkerConfig};
