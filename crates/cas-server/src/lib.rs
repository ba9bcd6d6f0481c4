//! CAS ticket registry service.
//!
//! Selects a ticket store from configuration, runs the registry cleaner on
//! a schedule, delivers single logout over HTTP and exposes an
//! administrative API for inspecting and revoking tickets.

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logout;
pub mod observability;
pub mod server;

pub use bootstrap::{AppState, build_state};
pub use config::AppConfig;
pub use server::{CasServer, ServerBuilder, build_app, router};
