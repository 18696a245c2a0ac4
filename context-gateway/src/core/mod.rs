pub mod config;
pub mod maintenance;
