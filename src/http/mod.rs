//! HTTP surface: the admission middleware, the demo endpoints and the server.

mod middleware;
mod routes;
mod server;

pub use middleware::{
    gated, ApiMessage, Gate, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, RATE_LIMIT_REACHED,
};
pub use routes::router;
pub use server::HttpServer;
