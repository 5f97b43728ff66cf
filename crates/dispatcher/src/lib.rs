pub mod audit;
pub mod backoff;
pub mod recurrence;
pub mod registry;
pub mod scheduler;

pub use audit::{AuditSink, ExecutionOutcome, OutcomeKind, TracingAuditSink};
pub use backoff::BackoffCalculator;
pub use recurrence::RecurrencePlanner;
pub use registry::{TaskHandler, TaskHandlerRegistry};
pub use scheduler::{SchedulerSettings, SchedulerStatus, TaskScheduler};
