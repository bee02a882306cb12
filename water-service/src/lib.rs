pub mod api;
pub mod calendar;
pub mod config;
pub mod consumption;
pub mod error;
pub mod locator;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod rollup;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod transform;

pub use consumption::{ConsumptionReport, ConsumptionService};
pub use pipeline::{Envelope, Pipeline};
