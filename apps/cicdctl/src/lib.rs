pub mod artifactory;
pub mod cli;
pub mod commands;
pub mod config;
pub mod constants;
pub mod deploy;
pub mod error;
pub mod git;
pub mod gitlab;
pub mod orchestrator;
pub mod package;
pub mod provision;
pub mod report;
pub mod secrets;
pub mod templates;
pub mod tower;
pub mod utils;

#[cfg(test)]
pub mod test_support;
