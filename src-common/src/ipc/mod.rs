//! Control channel between the console and the capture worker.

mod protocol;
mod requests;
mod responses;

pub use protocol::*;
pub use requests::*;
pub use responses::*;
