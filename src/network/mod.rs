// Network module - HTTP server that the shutdown coordinator drains

pub mod handler;
pub mod http1;

pub use handler::{Handler, HealthHandler};
pub use http1::HttpServer;
