//! Application layer containing the commerce workflows.
//!
//! Each component is a thin, cloneable service over the shared [`Store`](crate::domain::ports::Store).
//! Multi-step mutations run inside one unit of work obtained from the store, and components
//! compose by passing that unit of work to each other's `*_within` operations.

pub mod catalog;
pub mod deposits;
pub mod engine;
pub mod ledger;
pub mod purchase;
pub mod scheduler;
pub mod sweeper;
