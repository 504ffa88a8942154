//! The cooperative task pool
//!
//! One mutex guards the whole graph: task records, per-token writer/reader
//! bookkeeping, and the ready heap. Submission happens from a single master
//! thread per driver call; workers pop ready tasks highest-priority-first
//! (FIFO within a priority level), execute them outside the lock, and
//! resolve dependents on completion.
//!
//! Tasks may block their worker thread in kernel or communication calls,
//! so callers size the pool for the deepest chain of simultaneously
//! blocking tasks (the LU driver uses lookahead + 2 as the floor). A task
//! that returns an error or panics marks the run failed; tasks that become
//! ready afterwards are drained without executing their bodies, and
//! `wait()` surfaces the first error once everything in flight has
//! settled.

use mosaic_core::{Error, Result};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, trace};

use crate::token::{Access, Dep, Token};

/// Priority levels for submitted tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    /// Trailing updates and other bulk work.
    Normal = 0,
    /// Panel factorization and the lookahead pipeline.
    High = 1,
}

type TaskBody = Box<dyn FnOnce() -> Result<()> + Send>;

struct TaskRecord {
    remaining: usize,
    dependents: Vec<usize>,
    body: Option<TaskBody>,
    priority: TaskPriority,
    done: bool,
}

#[derive(Default)]
struct TokenState {
    last_writer: Option<usize>,
    readers_since_write: Vec<usize>,
}

struct ReadyTask {
    priority: TaskPriority,
    sequence: usize,
}

impl Eq for ReadyTask {}

impl PartialEq for ReadyTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

// Higher priority first, then lower sequence (earlier submission) first
impl Ord for ReadyTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for ReadyTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct GraphState {
    tasks: Vec<TaskRecord>,
    tokens: Vec<TokenState>,
    ready: BinaryHeap<ReadyTask>,
    outstanding: usize,
}

struct SchedulerInner {
    graph: Mutex<GraphState>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    failed: AtomicBool,
    first_error: Mutex<Option<Error>>,
}

/// Token-dataflow scheduler over a fixed worker pool.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn a pool with `num_threads` workers (at least one).
    ///
    /// Workers are named `mosaic-worker-0`, `mosaic-worker-1`, etc.
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let inner = Arc::new(SchedulerInner {
            graph: Mutex::new(GraphState {
                tasks: Vec::new(),
                tokens: Vec::new(),
                ready: BinaryHeap::new(),
                outstanding: 0,
            }),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            first_error: Mutex::new(None),
        });

        let mut workers = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let inner_clone = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("mosaic-worker-{}", i))
                .spawn(move || worker_loop(&inner_clone))
                .expect("failed to spawn scheduler worker thread");
            workers.push(handle);
        }

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Allocate a fresh dependency token.
    pub fn token(&self) -> Token {
        let mut graph = self.inner.graph.lock();
        graph.tokens.push(TokenState::default());
        Token(graph.tokens.len() - 1)
    }

    /// Allocate an array of tokens.
    pub fn token_array(&self, n: usize) -> Vec<Token> {
        (0..n).map(|_| self.token()).collect()
    }

    /// Submit a task with its dependency set.
    ///
    /// Conflicting tasks (read/write or write/write on a shared token)
    /// execute in submission order; disjoint tasks may run concurrently.
    pub fn submit(
        &self,
        priority: TaskPriority,
        deps: &[Dep],
        body: impl FnOnce() -> Result<()> + Send + 'static,
    ) {
        let mut graph = self.inner.graph.lock();
        let id = graph.tasks.len();

        let mut preds: FxHashSet<usize> = FxHashSet::default();
        for dep in deps {
            let Token(t) = dep.token;
            match dep.access {
                Access::In => {
                    if let Some(w) = graph.tokens[t].last_writer {
                        preds.insert(w);
                    }
                    graph.tokens[t].readers_since_write.push(id);
                }
                Access::Out | Access::InOut => {
                    if let Some(w) = graph.tokens[t].last_writer {
                        preds.insert(w);
                    }
                    let readers = std::mem::take(&mut graph.tokens[t].readers_since_write);
                    preds.extend(readers);
                    graph.tokens[t].last_writer = Some(id);
                }
            }
        }
        preds.remove(&id);

        let mut remaining = 0;
        for &p in &preds {
            if !graph.tasks[p].done {
                graph.tasks[p].dependents.push(id);
                remaining += 1;
            }
        }

        graph.tasks.push(TaskRecord {
            remaining,
            dependents: Vec::new(),
            body: Some(Box::new(body)),
            priority,
            done: false,
        });
        graph.outstanding += 1;

        trace!(task = id, ?priority, preds = remaining, "task submitted");
        if remaining == 0 {
            graph.ready.push(ReadyTask {
                priority,
                sequence: id,
            });
            self.inner.work_ready.notify_one();
        }
    }

    /// Block until every submitted task has settled, then report the first
    /// failure if any task errored or panicked.
    pub fn wait(&self) -> Result<()> {
        let mut graph = self.inner.graph.lock();
        while graph.outstanding > 0 {
            self.inner.drain_cond.wait(&mut graph);
        }
        drop(graph);
        match self.inner.first_error.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Signal workers to exit and join them. Called automatically on drop.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::Release);

        // Lock the graph before notifying to prevent lost-wakeup: a worker
        // between its shutdown check and condvar wait holds this lock, so
        // acquiring it guarantees the worker either is already in wait()
        // (and our notify will wake it) or will re-check shutdown.
        {
            let _graph = self.inner.graph.lock();
            self.inner.work_ready.notify_all();
        }

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: &SchedulerInner) {
    loop {
        let (id, body) = {
            let mut graph = inner.graph.lock();
            let id = loop {
                if let Some(task) = graph.ready.pop() {
                    break task.sequence;
                }
                if inner.shutdown.load(AtomicOrdering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut graph);
            };
            let body = graph.tasks[id].body.take();
            (id, body)
        };

        // Execute outside the lock. After a failure the run is draining:
        // bodies of tasks that become ready are dropped, not run.
        if !inner.failed.load(AtomicOrdering::Acquire) {
            let outcome = match body {
                Some(body) => std::panic::catch_unwind(std::panic::AssertUnwindSafe(body)),
                None => Ok(Ok(())),
            };
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(task = id, error = %e, "task failed");
                    record_failure(inner, e);
                }
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .copied()
                        .map(str::to_owned)
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "(non-string panic)".to_owned());
                    error!(task = id, panic = %msg, "task panicked");
                    record_failure(inner, Error::internal(format!("task panicked: {}", msg)));
                }
            }
        }

        // Resolve dependents and drain bookkeeping.
        let mut graph = inner.graph.lock();
        graph.tasks[id].done = true;
        graph.outstanding -= 1;
        let dependents = std::mem::take(&mut graph.tasks[id].dependents);
        let mut woke = 0;
        for d in dependents {
            graph.tasks[d].remaining -= 1;
            if graph.tasks[d].remaining == 0 {
                let priority = graph.tasks[d].priority;
                graph.ready.push(ReadyTask {
                    priority,
                    sequence: d,
                });
                woke += 1;
            }
        }
        if woke > 1 {
            inner.work_ready.notify_all();
        } else if woke == 1 {
            inner.work_ready.notify_one();
        }
        if graph.outstanding == 0 {
            inner.drain_cond.notify_all();
        }
    }
}

fn record_failure(inner: &SchedulerInner, e: Error) {
    inner.failed.store(true, AtomicOrdering::Release);
    let mut slot = inner.first_error.lock();
    if slot.is_none() {
        *slot = Some(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    #[test]
    fn test_submit_and_wait() {
        let sched = Scheduler::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            sched.submit(TaskPriority::Normal, &[], move || {
                c.fetch_add(1, AtomicOrdering::Relaxed);
                Ok(())
            });
        }
        sched.wait().unwrap();
        assert_eq!(counter.load(AtomicOrdering::Relaxed), 10);
    }

    #[test]
    fn test_conflicting_tasks_run_in_submission_order() {
        let sched = Scheduler::new(4);
        let t = sched.token();
        let order = Arc::new(PMutex::new(Vec::new()));
        for i in 0..6 {
            let o = Arc::clone(&order);
            sched.submit(TaskPriority::Normal, &[Dep::write(t)], move || {
                o.lock().push(i);
                Ok(())
            });
        }
        sched.wait().unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_readers_run_after_writer_and_before_next_writer() {
        let sched = Scheduler::new(4);
        let t = sched.token();
        let log = Arc::new(PMutex::new(Vec::new()));

        let l = Arc::clone(&log);
        sched.submit(TaskPriority::Normal, &[Dep::write(t)], move || {
            l.lock().push("write0");
            Ok(())
        });
        for _ in 0..3 {
            let l = Arc::clone(&log);
            sched.submit(TaskPriority::Normal, &[Dep::read(t)], move || {
                l.lock().push("read");
                Ok(())
            });
        }
        let l = Arc::clone(&log);
        sched.submit(TaskPriority::Normal, &[Dep::write(t)], move || {
            l.lock().push("write1");
            Ok(())
        });
        sched.wait().unwrap();

        let log = log.lock();
        assert_eq!(log[0], "write0");
        assert_eq!(log[4], "write1");
        assert_eq!(log[1..4].iter().filter(|s| **s == "read").count(), 3);
    }

    #[test]
    fn test_disjoint_tasks_overlap() {
        // Two tasks on different tokens must be able to run concurrently:
        // both rendezvous on a barrier that only opens when both are in
        // flight at once.
        let sched = Scheduler::new(2);
        let (a, b) = (sched.token(), sched.token());
        let barrier = Arc::new(Barrier::new(2));

        let ba = Arc::clone(&barrier);
        sched.submit(TaskPriority::Normal, &[Dep::write(a)], move || {
            ba.wait();
            Ok(())
        });
        let bb = Arc::clone(&barrier);
        sched.submit(TaskPriority::Normal, &[Dep::write(b)], move || {
            bb.wait();
            Ok(())
        });
        sched.wait().unwrap();
    }

    #[test]
    fn test_high_priority_dispatches_first() {
        let sched = Scheduler::new(1);
        let gate = Arc::new(Barrier::new(2));
        let order = Arc::new(PMutex::new(Vec::new()));

        // Occupy the single worker so submissions queue up.
        let g = Arc::clone(&gate);
        sched.submit(TaskPriority::Normal, &[], move || {
            g.wait();
            Ok(())
        });
        std::thread::sleep(std::time::Duration::from_millis(50));

        let o = Arc::clone(&order);
        sched.submit(TaskPriority::Normal, &[], move || {
            o.lock().push("normal");
            Ok(())
        });
        let o = Arc::clone(&order);
        sched.submit(TaskPriority::High, &[], move || {
            o.lock().push("high");
            Ok(())
        });

        gate.wait();
        sched.wait().unwrap();
        assert_eq!(*order.lock(), vec!["high", "normal"]);
    }

    #[test]
    fn test_error_aborts_after_drain() {
        let sched = Scheduler::new(2);
        let t = sched.token();
        let ran_after = Arc::new(AtomicUsize::new(0));

        sched.submit(TaskPriority::Normal, &[Dep::write(t)], || {
            Err(Error::kernel("gemm", "synthetic failure"))
        });
        let r = Arc::clone(&ran_after);
        sched.submit(TaskPriority::Normal, &[Dep::write(t)], move || {
            r.fetch_add(1, AtomicOrdering::Relaxed);
            Ok(())
        });

        let err = sched.wait().unwrap_err();
        assert!(matches!(err, Error::KernelFailure { .. }));
        // The dependent became ready during the drain but its body was
        // dropped, not run.
        assert_eq!(ran_after.load(AtomicOrdering::Relaxed), 0);
    }

    #[test]
    fn test_panic_is_captured_as_internal_error() {
        let sched = Scheduler::new(2);
        sched.submit(TaskPriority::Normal, &[], || panic!("kernel exploded"));
        let err = sched.wait().unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
        assert!(err.to_string().contains("kernel exploded"));
    }

    #[test]
    fn test_wait_is_reusable_across_batches() {
        let sched = Scheduler::new(2);
        let t = sched.token();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        sched.submit(TaskPriority::Normal, &[Dep::write(t)], move || {
            c.fetch_add(1, AtomicOrdering::Relaxed);
            Ok(())
        });
        sched.wait().unwrap();

        let c = Arc::clone(&counter);
        sched.submit(TaskPriority::Normal, &[Dep::read(t)], move || {
            c.fetch_add(1, AtomicOrdering::Relaxed);
            Ok(())
        });
        sched.wait().unwrap();
        assert_eq!(counter.load(AtomicOrdering::Relaxed), 2);
    }
}
