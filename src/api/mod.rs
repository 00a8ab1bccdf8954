pub mod extract;
pub mod health;
pub mod latency;
pub mod middleware;
pub mod routes;

pub use routes::{router, ApiState};
