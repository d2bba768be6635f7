//! Funnel conversion analysis over a batch of timestamped entity events.
//!
//! Events are grouped into per-entity journeys, each journey is walked through the ordered
//! funnel steps, and the resulting progressions are reduced into per-step conversion,
//! drop-off and timing metrics.

pub mod definition;
pub mod engine;
pub mod error;
pub mod event;
pub mod journey;
pub mod matcher;
pub mod metrics;
pub mod summary;

pub use definition::{FunnelConfig, FunnelDefinition, FunnelMode, MatchPolicy, WindowSpec};
pub use engine::{BreakdownAttribution, BreakdownReport, FunnelEngine, FunnelReport, ReportStatus};
pub use error::FunnelError;
pub use event::Event;
pub use matcher::EntityProgression;
pub use metrics::StepMetric;
pub use summary::{DropOff, FunnelSummary};
