pub mod cli;
pub mod commands;
pub mod config;
pub mod metrics;
pub mod pattern;
