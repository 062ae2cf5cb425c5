//! pdb-controller: keeps a PodDisruptionBudget next to every Deployment and
//! StatefulSet
//!
//! Each pass lists the workloads of the selected namespaces, gives every one
//! of them a budget tolerating the loss of a single replica, and removes
//! budgets whose workload is gone or has been non-ready for too long.

pub mod clock;
pub mod cluster;
pub mod controller;
pub mod error;
pub mod selector;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
