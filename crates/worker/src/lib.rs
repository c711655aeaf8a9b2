//! `jobq-worker`: a worker pool that leases jobs from the server and runs
//! them through a user handler.
//!
//! ```ignore
//! let queue = JobQueue::spawn(ctx, "email", QueueOptions::default().with_concurrency(4), |unit, cb| {
//!     tokio::spawn(async move {
//!         for job in unit.jobs() {
//!             let _ = job.done(serde_json::Value::Null, Default::default()).await;
//!         }
//!         let _ = cb.call();
//!     });
//! })?;
//! // ...
//! queue.shutdown(ShutdownOptions::default()).await;
//! ```

pub mod config;
pub mod error;
pub mod queue;
pub mod unit;

pub use config::{ErrorCallback, JobTypes, PollInterval, QueueOptions, ShutdownLevel, ShutdownOptions};
pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, ShutdownHandle, WorkHandler, SHUTDOWN_FAILURE};
pub use unit::{UnitCallback, WorkUnit};
