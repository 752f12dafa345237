//! Azure Resource Manager clients: the batch endpoint, scope enumeration and
//! role collection.

pub mod batch;
pub mod roles;
pub mod scopes;

pub use batch::{BatchClient, BatchRequest, BatchResponseItem};
