//! Infrastructure layer - Key stores, rate limit stores and observability

pub mod api_key;
pub mod observability;
