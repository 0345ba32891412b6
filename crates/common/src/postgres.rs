mod client;
mod config;
mod credential_repository;

pub use client::*;
pub use config::*;
pub use credential_repository::*;
