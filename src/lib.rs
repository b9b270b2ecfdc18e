pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod notify;
pub mod output;
pub mod report;
pub mod session;
pub mod upload;
pub mod utils;

#[cfg(test)]
mod tests;
