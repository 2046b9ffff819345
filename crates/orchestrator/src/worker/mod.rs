//! Dispatch backends: how a started, resumed, or aborted process actually
//! gets run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Dispatch                              │
//! │       (start, resume, abort — backend-agnostic surface)      │
//! └─────────────────────────────────────────────────────────────┘
//!              │                                   │
//!              ▼                                   ▼
//! ┌─────────────────────────┐       ┌─────────────────────────────┐
//! │   ThreadPoolExecutor     │       │   WorkerQueueExecutor        │
//! │  (bounded Semaphore,     │       │  (new_tasks/new_workflows/   │
//! │   inline for tests)      │       │   resume_tasks/resume_wfs)   │
//! └─────────────────────────┘       └─────────────────────────────┘
//! ```

mod dispatch;
mod queue;
mod threadpool;

pub use dispatch::{Dispatch, DispatchError, WorkerStatus};
pub use queue::{WorkerQueueExecutor, NEW_TASK, NEW_WORKFLOW, RESUME_TASK, RESUME_WORKFLOW};
pub use threadpool::ThreadPoolExecutor;
