pub mod archive;
pub mod caption;
pub mod cli;
pub mod config;
pub mod content;
pub mod delivery;
pub mod error;
pub mod generation;
pub mod image_processing;
pub mod notify;
pub mod pipeline;
pub mod scheduler;
pub mod telemetry;
