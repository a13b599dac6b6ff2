//! Metrics and observability infrastructure.
//!
//! - `events`: Internal event types and the `InternalEvent` trait
//! - `exporter`: Prometheus push gateway initialization

pub mod events;
pub mod exporter;

pub use exporter::init;

/// Macro for emitting metric events (Vector-style pattern).
///
/// Calls `InternalEvent::emit()` on the given event, which records the
/// corresponding metric.
///
/// # Example
///
/// ```ignore
/// use sluice_core::metrics::events::{StorageOperation, StorageRequest, RequestStatus};
///
/// emit!(StorageRequest { operation: StorageOperation::List, status: RequestStatus::Success });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
