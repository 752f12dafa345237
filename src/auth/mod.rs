//! Token acquisition for the ARM and MS Graph APIs.

pub mod federated;

pub use federated::{Audience, TokenProvider};
