//! Shared domain types for the Mailstack workspace.
//!
//! Enumerations used across the billing core, the API server and the
//! worker. All of them are stored as TEXT in Postgres; row structs read
//! them as `String` and parse at the edge where the distinction matters.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{
    DomainSource, DomainStatus, JobKind, MailboxStatus, MailboxType, OrderType, PaymentMethod,
    SubscriptionKind, SubscriptionStatus,
};
