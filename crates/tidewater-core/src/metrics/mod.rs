//! Metrics and observability infrastructure.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: Prometheus recorder and HTTP endpoint

pub mod events;
pub mod server;

pub use server::{MetricsController, init_global, init_test};

/// Emit an internal event as metrics.
///
/// ```ignore
/// use tidewater_core::emit;
/// use tidewater_core::metrics::events::RecordsExtracted;
///
/// emit!(RecordsExtracted { pipeline: "trades".into(), count: 42 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        <_ as $crate::metrics::events::InternalEvent>::emit($event)
    };
}

pub use emit;
