//! Quiniela Gate - request admission for the quiniela pools API
//!
//! Named fixed-window limiters guard classes of API endpoints (general
//! traffic, authentication, password resets and pool creation). The limiters
//! can be mounted in-process as axum middleware or run as a standalone
//! admission service queried by a reverse proxy.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
