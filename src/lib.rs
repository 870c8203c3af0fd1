//! Keeps a local directory and a live design canvas in sync.
//!
//! A sync round takes the peer's file snapshot through `detect`, settles
//! conflicts that only changed on one side through `reconcile`, and puts the
//! rest to the user through the `coordinator`. `session` ties the pieces to
//! one connection.

#[macro_use]
extern crate log;

pub mod archive;
pub mod config;
pub mod coordinator;
pub mod detect;
pub mod error;
pub mod fingerprint;
pub mod port;
pub mod propagate;
pub mod protocol;
pub mod reconcile;
pub mod sanitize;
pub mod session;
pub mod state;
pub mod util;

pub use crate::error::SyncError;
