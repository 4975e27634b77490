pub mod config;
pub mod errors;
pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod recon;
pub mod scene;
pub mod settings;
pub mod ui;
pub mod util;
