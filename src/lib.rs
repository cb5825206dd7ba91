pub mod alerts;
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod relay;
pub mod transport;
