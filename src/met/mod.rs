//! Everything specific to the Met collection API: wire types, the HTTP client
//! and the caches keyed for its queries.

pub mod api_types;
pub mod cache;
pub mod client;
pub mod error;
pub mod types;
