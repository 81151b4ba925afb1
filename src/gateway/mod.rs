//! Remote data gateway for stories and NGO registrations.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod operation;
pub mod types;

pub use cached_client::CachedGateway;
pub use client::Gateway;
pub use operation::Operation;
