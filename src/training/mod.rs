//! Training module
//!
//! - `config`: run configuration with JSON load/save
//! - `trainer`: the `Trainer` context (evaluate / fit)
//! - `pipeline`: the full load → assemble → baseline → fit → save run

pub mod config;
pub mod pipeline;
pub mod trainer;

pub use config::TransferConfig;
pub use pipeline::{evaluate_artifact, run_transfer, TransferOutcome};
pub use trainer::{adam, evaluate_model, Trainer, TrainerSettings, TrainingState};
