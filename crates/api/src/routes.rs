//! HTTP route handlers.

pub mod health;
pub mod instances;
pub mod metrics;
pub mod workflows;
