pub mod app;
pub mod assistant;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod git;
pub mod github;
pub mod http;
pub mod orchestrator;
pub mod schedule;
pub mod types;
