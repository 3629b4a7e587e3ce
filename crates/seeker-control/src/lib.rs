pub mod cancel;
pub mod config;
pub mod control_loop;
pub mod error;
pub mod pipeline;

pub use cancel::CancelToken;
pub use config::{check_loop, LoopConfig, LostPolicy};
pub use control_loop::{ControlLoop, LoopReport, Outcome};
pub use error::ControlError;
pub use pipeline::{LoopSetup, Pipeline};
