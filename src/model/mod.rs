//! Core data model.
//!
//! A job is something that needs downloading. It has identity (its filename),
//! a locator, and a few routing hints. Media metadata is what collaborators
//! learn about the locator along the way.

pub mod job;
pub mod media;

pub use job::{Job, JobName};
pub use media::{ArchiveKey, MediaMeta};
