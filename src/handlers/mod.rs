//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, raw bytes)
//! 2. Delegates to the services layer
//! 3. Returns HTTP response (JSON, status code)

/// Health check endpoint
pub mod health;
/// Payment initiation, retry and lookup endpoints
pub mod payments;
/// Inbound processor webhook endpoints
pub mod webhooks;
