// Parallel batch processing pipeline

pub mod batcher;
pub mod coordinator;
pub mod detection;
pub mod engine;
pub mod error;
pub mod transforms;
pub mod types;
pub mod worker;
