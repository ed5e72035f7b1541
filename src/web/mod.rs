pub mod api;
pub mod auth;
pub mod error;
pub mod forward;
pub mod handlers;
pub mod logging_middleware;
pub mod master;
pub mod middleware;
pub mod mirror;
pub mod observer;
pub mod proxy;
pub mod routes;
pub mod state;

pub use routes::create_router;
