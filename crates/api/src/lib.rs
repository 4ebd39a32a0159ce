//! `lk-api` — Remote API Client: request/response facade for the
//! network's profile and list endpoints, with authentication refresh
//! and an explicit bounded-backoff retry helper.

pub mod client;
pub mod retry;

pub use client::{ApiClient, Credentials};
