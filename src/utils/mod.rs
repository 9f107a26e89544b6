pub mod cache;
pub mod command;
pub mod file;
pub mod stats;
pub mod tracking;
