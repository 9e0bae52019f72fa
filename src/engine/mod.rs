//! Consumer engine: batch control loop and the per-job pipeline.

pub mod control;
pub mod pipeline;

pub use control::{ControlConfig, ControlPlane, RunSummary};
pub use pipeline::{AppKind, Delivery, Pipeline};
