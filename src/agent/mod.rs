//! The agent tool-call loop: bounded alternation between model turns and
//! tool executions, streaming as it goes.

mod events;
mod runner;

pub use events::AgentEvent;
pub use runner::{AgentLoop, MAX_TURNS};

use thiserror::Error;

use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The model endpoint failed; this is the only error class that
    /// terminates a run. Tool failures travel back to the model as data.
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("run cancelled")]
    Aborted,
}
