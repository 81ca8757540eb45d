// src/engine/mod.rs

//! Task orchestration.
//!
//! - [`task`]: the task abstraction, its state machine and its active-tool slot.
//! - [`build_task`]: the leaf task built from config.
//! - [`parallel`]: a group whose children run concurrently.
//! - [`registry`]: ordered execution, lookup and interrupt fan-out.
//! - [`pool`]: bounded concurrency for fine-grained work inside a task.
//! - [`background`]: a single FIFO worker for deferred jobs.
//! - [`context`]: the read-only configuration shared by everything above.

pub mod background;
pub mod build_task;
pub mod context;
pub mod parallel;
pub mod pool;
pub mod registry;
pub mod task;

pub use background::BackgroundQueue;
pub use build_task::{BuildTask, task_from_config};
pub use context::{CoreConfig, RunContext};
pub use parallel::ParallelTaskGroup;
pub use pool::WorkerPool;
pub use registry::TaskRegistry;
pub use task::{Task, TaskCore, TaskState};
