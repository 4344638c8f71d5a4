pub mod commands;
pub mod config;
pub mod connections;
pub mod context;
pub mod jenkins;
pub mod lifecycle;
pub mod notify;
pub mod resolver;
pub mod terminal;
