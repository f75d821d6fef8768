pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod history;
pub mod key_selection;
pub mod settings;
pub mod telemetry;
pub mod utils;
