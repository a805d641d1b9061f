//! HTTP surfaces: registry API and gateway admin endpoints

pub mod gateway;
pub mod registry;
pub mod routes;
