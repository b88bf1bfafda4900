//! Task dispatch: worker pool, pending-task accounting, completion
//! routing and the per-table manager.

mod completion;
mod manager;
mod pending;
mod pool;

pub use completion::{Completion, CompletionQueue, CompletionSink};
pub use manager::{CryptoOp, ManagerConfig, TableManager};
pub use pending::{PendingGuard, PendingTasks};
pub use pool::WorkerPool;
