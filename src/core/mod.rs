pub mod archive;
pub mod build;
pub mod chat;
pub mod config;
pub mod diff;
pub mod hil;
pub mod history;
pub mod orchestrator;
pub mod process;
pub mod project;
pub mod remote;
pub mod scratch;
pub mod terminal;
pub mod transform;

#[cfg(test)]
pub mod testing;
