//! Domain foundation building blocks for winebox.
//!
//! This crate contains **pure domain** primitives shared by the label and
//! inventory crates (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod event;
pub mod id;

pub use aggregate::{execute, Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use event::Event;
pub use id::{TransactionId, WineId};
