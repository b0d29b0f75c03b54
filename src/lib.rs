pub mod auth;
pub mod cancel;
pub mod config;
pub mod db;
pub mod generator;
pub mod log;
pub mod model;
pub mod prompt;
pub mod runner;
pub mod session;
pub mod sink;
