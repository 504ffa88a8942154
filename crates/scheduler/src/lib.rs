//! Token-dataflow task scheduler
//!
//! Drivers express their pipeline as tasks carrying dependency tokens
//! tagged `in`, `out`, or `inout`. Tokens hold no data — they exist solely
//! to encode happens-before: two tasks with conflicting accesses to a token
//! execute in submission order, tasks with disjoint token sets run in any
//! order across the worker pool. Priorities are two-level; high-priority
//! runnable tasks dispatch first, FIFO within a level, so normal work is
//! never starved once the high queue drains.

pub mod pool;
pub mod token;

pub use pool::{Scheduler, TaskPriority};
pub use token::{Access, Dep, Token};
