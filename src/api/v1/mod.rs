/*
 * Responsibility
 * - Entry point of v1 (re-export of routes() etc.)
 */
pub mod extractors;
pub mod handlers;
mod routes;

pub use routes::routes;
