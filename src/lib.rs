//! # ondl-rs
//!
//! Filesystem-backed download queue.
//!
//! Jobs are small JSON files that move between state directories
//! (`incoming` → `processing` → `done`/`error`) by atomic rename. An
//! ingestion gate deduplicates requests before they are queued, and a batch
//! consumer claims jobs and runs them through external collaborators
//! (`yt-dlp`, `ffmpeg`, a Discord webhook) behind traits.

pub mod archive;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod model;
pub mod paths;
pub mod queue;
pub mod telemetry;
pub mod tools;
