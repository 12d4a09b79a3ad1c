// saturn-consumer: the Task Consumer and Drain Controller (§4.4, §4.5) --
// priority-multiplexed dequeue loops, bounded concurrency, deadline
// enforcement, retry/terminal classification, and graceful shutdown.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod config;
pub mod consumer;
pub mod drain;
pub mod error;
pub mod execution;
pub mod registry;

pub use config::{RawWorkerConfig, WorkerConfig};
pub use consumer::TaskConsumer;
pub use drain::{DrainConfig, DrainController, DrainState};
pub use error::{ConsumerError, ConsumerResult};
pub use execution::ExecutionRecord;
pub use registry::{Handler, HandlerRegistry};
