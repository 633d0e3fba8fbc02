pub mod config;
pub mod domain;
pub mod errors;
pub mod infra;
pub mod session;
