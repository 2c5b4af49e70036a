//! Fixed-pool task system for asset-import style workloads. One FIFO per
//! worker, no work stealing; the enqueue path prefers an idle worker and
//! falls back to the least busy one. Tasks cannot be cancelled once
//! enqueued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::debug;
use parking_lot::{Condvar, Mutex};

pub type TaskFunction = Box<dyn FnOnce() + Send + 'static>;

/// Identifies an enqueued task: which worker queue it went to and its
/// sequence number within that queue. Queues run strictly in order, so
/// "completed id >= my id" means done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    worker_id: usize,
    sequential_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Waiting,
    InProgress,
    Completed,
}

struct Task {
    sequential_id: u64,
    function: TaskFunction,
}

struct WorkerShared {
    queue: Mutex<VecDeque<Task>>,
    idle_condition: Condvar,
    alive: AtomicBool,

    idle: AtomicBool,
    num_waiting_tasks: AtomicU64,
    last_started_sequential_id: AtomicU64,
    last_completed_sequential_id: AtomicU64,
}

struct Worker {
    shared: Arc<WorkerShared>,
    next_sequential_id: AtomicU64,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(worker_id: usize) -> Self {
        let shared = Arc::new(WorkerShared {
            queue: Mutex::new(VecDeque::new()),
            idle_condition: Condvar::new(),
            alive: AtomicBool::new(true),
            idle: AtomicBool::new(true),
            num_waiting_tasks: AtomicU64::new(0),
            last_started_sequential_id: AtomicU64::new(0),
            last_completed_sequential_id: AtomicU64::new(0),
        });

        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name(format!("task-graph-worker-{worker_id}"))
            .spawn(move || Self::worker_main(thread_shared))
            .expect("failed to spawn task graph worker thread");

        Self {
            shared,
            next_sequential_id: AtomicU64::new(1),
            thread: Some(thread),
        }
    }

    fn worker_main(shared: Arc<WorkerShared>) {
        loop {
            let task = {
                let mut queue = shared.queue.lock();
                loop {
                    if let Some(task) = queue.pop_front() {
                        break task;
                    }
                    if !shared.alive.load(Ordering::Acquire) {
                        return;
                    }
                    shared.idle.store(true, Ordering::Release);
                    shared.idle_condition.wait(&mut queue);
                }
            };

            shared.idle.store(false, Ordering::Release);
            shared.num_waiting_tasks.fetch_sub(1, Ordering::AcqRel);
            shared
                .last_started_sequential_id
                .store(task.sequential_id, Ordering::Release);

            (task.function)();

            shared
                .last_completed_sequential_id
                .store(task.sequential_id, Ordering::Release);
        }
    }

    fn enqueue(&self, worker_id: usize, function: TaskFunction) -> TaskHandle {
        let sequential_id = self.next_sequential_id.fetch_add(1, Ordering::AcqRel);
        {
            let mut queue = self.shared.queue.lock();
            queue.push_back(Task {
                sequential_id,
                function,
            });
        }
        self.shared.num_waiting_tasks.fetch_add(1, Ordering::AcqRel);
        self.shared.idle.store(false, Ordering::Release);
        self.shared.idle_condition.notify_one();
        TaskHandle {
            worker_id,
            sequential_id,
        }
    }

    fn is_free(&self) -> bool {
        self.shared.num_waiting_tasks.load(Ordering::Acquire) == 0
    }

    fn num_waiting_tasks(&self) -> u64 {
        self.shared.num_waiting_tasks.load(Ordering::Acquire)
    }

    fn is_idle(&self) -> bool {
        self.shared.idle.load(Ordering::Acquire)
            && self.shared.num_waiting_tasks.load(Ordering::Acquire) == 0
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::Release);
        self.shared.idle_condition.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub struct TaskGraph {
    workers: Vec<Worker>,
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGraph {
    /// Worker count = hardware concurrency - 1 (the main thread works
    /// too), at least 1.
    pub fn new() -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1);
        Self::with_worker_count(worker_count)
    }

    pub fn with_worker_count(worker_count: usize) -> Self {
        assert!(worker_count >= 1);
        debug!("task graph starting {worker_count} workers");
        Self {
            workers: (0..worker_count).map(Worker::spawn).collect(),
        }
    }

    pub fn worker_thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Picks the first worker with an empty queue, else the least busy
    /// one.
    pub fn enqueue_task(&self, function: impl FnOnce() + Send + 'static) -> TaskHandle {
        let worker_id = self
            .workers
            .iter()
            .position(|w| w.is_free())
            .unwrap_or_else(|| {
                self.workers
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, w)| w.num_waiting_tasks())
                    .map(|(i, _)| i)
                    .unwrap()
            });
        self.workers[worker_id].enqueue(worker_id, Box::new(function))
    }

    pub fn check_status(&self, handle: TaskHandle) -> TaskStatus {
        let shared = &self.workers[handle.worker_id].shared;
        if shared.last_completed_sequential_id.load(Ordering::Acquire) >= handle.sequential_id {
            TaskStatus::Completed
        } else if shared.last_started_sequential_id.load(Ordering::Acquire) >= handle.sequential_id
        {
            TaskStatus::InProgress
        } else {
            TaskStatus::Waiting
        }
    }

    /// Spin-polls until the task has run to completion.
    pub fn wait_for(&self, handle: TaskHandle) {
        let shared = &self.workers[handle.worker_id].shared;
        while shared.last_completed_sequential_id.load(Ordering::Acquire) < handle.sequential_id {
            std::thread::yield_now();
        }
    }

    pub fn wait_for_all(&self, handles: &[TaskHandle]) {
        for handle in handles {
            self.wait_for(*handle);
        }
    }

    pub fn check_all_completed(&self, handles: &[TaskHandle]) -> bool {
        handles
            .iter()
            .all(|h| self.check_status(*h) == TaskStatus::Completed)
    }

    pub fn is_graph_idle(&self) -> bool {
        self.workers.iter().all(|w| w.is_idle())
    }

    pub fn wait_until_graph_is_idle(&self) {
        while !self.is_graph_idle() {
            std::thread::yield_now();
        }
    }

    /// Runs `body(index)` for every index in `0..count`, partitioned into
    /// `min(count, workers + 1)` contiguous chunks. All but the last chunk
    /// are dispatched to workers; the last runs on the calling thread.
    pub fn parallel_for<F>(&self, count: usize, body: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        if count == 0 {
            return;
        }

        let chunk_count = count.min(self.worker_thread_count() + 1);
        let per_chunk = count.div_ceil(chunk_count);

        // lifetime laundering for the worker closures; sound because
        // wait_for_all below blocks until every chunk has run
        let body_ref: &(dyn Fn(usize) + Send + Sync) = &body;
        let body_static: &'static (dyn Fn(usize) + Send + Sync) =
            unsafe { std::mem::transmute(body_ref) };

        let mut handles = Vec::with_capacity(chunk_count.saturating_sub(1));
        for chunk_index in 0..chunk_count.saturating_sub(1) {
            let start = chunk_index * per_chunk;
            let end = (start + per_chunk).min(count);
            handles.push(self.enqueue_task(move || {
                for index in start..end {
                    body_static(index);
                }
            }));
        }

        let last_start = (chunk_count - 1) * per_chunk;
        for index in last_start..count {
            body(index);
        }

        self.wait_for_all(&handles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn enqueued_tasks_run_and_complete() {
        let graph = TaskGraph::with_worker_count(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let counter = counter.clone();
                graph.enqueue_task(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        graph.wait_for_all(&handles);
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        assert!(graph.check_all_completed(&handles));
    }

    #[test]
    fn wait_for_single_handle_blocks_until_done() {
        let graph = TaskGraph::with_worker_count(1);
        let flag = Arc::new(AtomicBool::new(false));
        let task_flag = flag.clone();

        let handle = graph.enqueue_task(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            task_flag.store(true, Ordering::SeqCst);
        });

        graph.wait_for(handle);
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(graph.check_status(handle), TaskStatus::Completed);
    }

    #[test]
    fn graph_reaches_idle_after_work_drains() {
        let graph = TaskGraph::with_worker_count(3);
        for _ in 0..32 {
            graph.enqueue_task(|| {
                std::thread::sleep(std::time::Duration::from_millis(1));
            });
        }
        graph.wait_until_graph_is_idle();
        assert!(graph.is_graph_idle());
    }

    #[test]
    fn parallel_for_visits_every_index_once() {
        let graph = TaskGraph::with_worker_count(3);
        let counts: Vec<AtomicUsize> = (0..1000).map(|_| AtomicUsize::new(0)).collect();

        graph.parallel_for(1000, |index| {
            counts[index].fetch_add(1, Ordering::SeqCst);
        });

        assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn parallel_for_with_fewer_items_than_workers() {
        let graph = TaskGraph::with_worker_count(8);
        let counts: Vec<AtomicUsize> = (0..3).map(|_| AtomicUsize::new(0)).collect();
        graph.parallel_for(3, |index| {
            counts[index].fetch_add(1, Ordering::SeqCst);
        });
        assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn parallel_for_zero_count_is_a_no_op() {
        let graph = TaskGraph::with_worker_count(1);
        graph.parallel_for(0, |_| panic!("must not run"));
    }
}
