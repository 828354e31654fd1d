//! HTTP surface: response contract, axum middleware and the admission service.

pub mod middleware;
pub mod response;
mod routes;
mod server;
mod service;

pub use middleware::{enforce, PolicyGuard};
pub use routes::{RouteConfig, RouteTable};
pub use server::HttpServer;
pub use service::{AdmissionService, PolicyStats};
