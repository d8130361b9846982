/*
 * Responsibility
 * - Public interface of the middleware layers
 *   - auth::access::apply (gate), http::apply (request-id / trace / limits), security_headers::apply
 */
pub mod auth;
pub mod http;
pub mod security_headers;
