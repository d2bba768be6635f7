pub mod commands;
pub mod config;
pub mod ingest;
pub mod lines;

pub mod cmd {
    pub use super::commands::Cli;
}
