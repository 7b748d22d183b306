pub mod cli;
pub mod config;
pub mod crawler;
pub mod errors;
pub mod models;
pub mod services;
pub mod utils;
