//! Hydration orchestrator: fills engagement counts from the cache and the
//! remote API with a bounded worker pool.

pub mod batch;
pub mod orchestrator;
pub mod report;
pub mod settings;
mod worker;

pub use batch::{effective_batch_size, plan_batches};
pub use orchestrator::{Hydrator, ProgressFn};
pub use report::HydrationReport;
pub use settings::{HydrationSettings, ReplyStrategy};
