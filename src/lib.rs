//! Chains — habit tracking on flat binary files.
//!
//! Two fixed-width record files hold the habits ("chains") and their
//! completion marks ("links"). Everything is loaded into memory per
//! command and only the changed suffix is written back.

pub mod calendar;
pub mod config;
pub mod stats;
pub mod store;
