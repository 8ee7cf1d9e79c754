//! Data Transfer Objects for REST request/response serialization.
//!
//! Field names are camelCase and timestamps are epoch seconds. Lease and
//! account resources are serialized from the domain types directly.

pub mod account_dto;
pub mod common_dto;
pub mod feed_dto;
pub mod lease_dto;

pub use account_dto::*;
pub use common_dto::*;
pub use feed_dto::*;
pub use lease_dto::*;
