//! `orderflow-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod order;

pub use error::{DomainError, DomainResult};
pub use id::OrderId;
pub use order::{Order, OrderStatus};
