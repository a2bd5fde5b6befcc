//! Domain layer for the herd book.
//!
//! Holds the record types, the pure cascade planner and the lactation and
//! inventory arithmetic shared by storage, the dispatcher and the reconciler.
pub mod cascade;
pub mod inventory;
pub mod lactation;
pub mod types;
