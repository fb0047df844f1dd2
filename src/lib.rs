pub mod app;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod mail;
pub mod pipeline;
pub mod remote;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod webhook;
