// Library exports for Piazza
// This allows integration tests and external code to use Piazza modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod requests;
pub mod routes;
pub mod social;
pub mod state;
pub mod storage;

pub use routes::router as app;
