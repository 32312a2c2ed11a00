//! Host-collaborator defaults and runtime bootstrap.

pub mod error;
pub mod fixture;
pub mod markup;
pub mod telemetry;
