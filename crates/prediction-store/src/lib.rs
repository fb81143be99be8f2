//! Keyed persistence for prediction records.
//!
//! Backed by sqlx over the Any driver (SQLite in dev/tests). The store is
//! the only component that touches the `predictions` table; everything else
//! goes through it. `put_if_absent` is atomic via the table's unique index,
//! which is what makes the lifecycle manager's double-checked locking sound.

mod store;

pub use store::{OutcomeUpdate, PredictionStore};
