//! Directory-graph (MS Graph) clients for Entra roles and application
//! permissions.

pub mod roles;

pub use roles::GraphCollector;
