pub mod api;
pub mod client;
pub mod error;
pub mod executor;
pub mod state;

pub use error::{Result, WorkerError};
pub use state::WorkerState;
