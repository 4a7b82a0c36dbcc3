//! Worker pool executing typed tasks submitted by the pipeline driver.
//!
//! The driver submits tasks, workers process them in parallel, and completion
//! messages flow back to the driver through a single channel; the driver is
//! the only consumer, so all pipeline state stays single-threaded. Worker
//! panics are captured and surfaced as failed results, never propagated.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

pub use async_trait::async_trait;
use tokio::{sync::mpsc, sync::Mutex, task::JoinHandle, time::sleep};
use vault_utils::panic_extractor::try_extract_panic_message;

const POLLING_INTERVAL_MS: u64 = 100;

/// Processor of one task type. One handler instance is shared by every
/// worker of a queue.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    type Task: Clone + Debug + Send + 'static;
    type Output: Send + 'static;

    /// Task-type name used in logs.
    const SERVICE_NAME: &'static str;

    async fn handle(&self, task: Self::Task) -> anyhow::Result<Self::Output>;
}

/// Outcome of one task.
#[derive(Debug)]
pub enum TaskResult<R> {
    Succeeded(R),
    Failed { error_message: String },
}

impl<R> TaskResult<R> {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Completion message delivered back to the driver.
#[derive(Debug)]
pub struct TaskCompletion<T, R> {
    pub task: T,
    pub result: TaskResult<R>,
}

/// A pool of workers executing tasks of one handler type.
#[derive(Debug)]
pub struct TaskQueue<H: TaskHandler> {
    task_sender: Option<mpsc::UnboundedSender<H::Task>>,
    completion_receiver: mpsc::UnboundedReceiver<TaskCompletion<H::Task, H::Output>>,
    in_flight: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
}

impl<H: TaskHandler> TaskQueue<H> {
    /// Spawns `worker_count` workers sharing `handler`.
    pub fn new(handler: Arc<H>, worker_count: usize) -> Self {
        let (task_sender, task_receiver) = mpsc::unbounded_channel::<H::Task>();
        let (completion_sender, completion_receiver) = mpsc::unbounded_channel();
        let task_receiver = Arc::new(Mutex::new(task_receiver));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let workers = (0..worker_count.max(1))
            .map(|worker_id| {
                let handler = Arc::clone(&handler);
                let task_receiver = Arc::clone(&task_receiver);
                let completion_sender = completion_sender.clone();
                let in_flight = Arc::clone(&in_flight);
                tokio::spawn(async move {
                    run_worker(worker_id, handler, task_receiver, completion_sender, in_flight)
                        .await;
                })
            })
            .collect();

        Self {
            task_sender: Some(task_sender),
            completion_receiver,
            in_flight,
            workers,
        }
    }

    /// Submits a task for processing.
    ///
    /// # Errors
    ///
    /// Fails if the queue was shut down.
    pub fn submit(&self, task: H::Task) -> anyhow::Result<()> {
        let sender = self
            .task_sender
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("task queue was shut down"))?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        sender
            .send(task)
            .map_err(|_| anyhow::anyhow!("all workers of the task queue have exited"))
    }

    /// Receives the next completion. Returns `None` once the queue is shut
    /// down and every completion has been drained.
    pub async fn next_completion(&mut self) -> Option<TaskCompletion<H::Task, H::Output>> {
        self.completion_receiver.recv().await
    }

    /// Non-blocking variant of [`Self::next_completion`].
    pub fn try_next_completion(&mut self) -> Option<TaskCompletion<H::Task, H::Output>> {
        self.completion_receiver.try_recv().ok()
    }

    /// Number of tasks submitted but not yet finished by a worker.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until no submitted task is still running. Completions may still
    /// be queued for the driver to drain afterwards.
    pub async fn await_all_tasks(&self) {
        while self.in_flight() > 0 {
            sleep(Duration::from_millis(POLLING_INTERVAL_MS)).await;
        }
    }

    /// Stops accepting tasks, lets the workers drain the backlog and joins
    /// them.
    pub async fn shutdown(&mut self) {
        self.task_sender = None;
        for worker in self.workers.drain(..) {
            if let Err(err) = worker.await {
                vault_logs::error!(
                    "{} worker exited abnormally: {}",
                    H::SERVICE_NAME,
                    try_extract_panic_message(err)
                );
            }
        }
    }
}

async fn run_worker<H: TaskHandler>(
    worker_id: usize,
    handler: Arc<H>,
    task_receiver: Arc<Mutex<mpsc::UnboundedReceiver<H::Task>>>,
    completion_sender: mpsc::UnboundedSender<TaskCompletion<H::Task, H::Output>>,
    in_flight: Arc<AtomicUsize>,
) {
    loop {
        let task = {
            let mut receiver = task_receiver.lock().await;
            receiver.recv().await
        };
        let Some(task) = task else {
            vault_logs::trace!("{} worker {worker_id} has no more tasks", H::SERVICE_NAME);
            break;
        };

        vault_logs::debug!("{} worker {worker_id} picked up {task:?}", H::SERVICE_NAME);
        // The handler runs on its own task so that a panic is contained and
        // reported instead of killing the worker.
        let handler = Arc::clone(&handler);
        let task_for_handler = task.clone();
        let join_result =
            tokio::spawn(async move { handler.handle(task_for_handler).await }).await;

        let result = match join_result {
            Ok(Ok(output)) => TaskResult::Succeeded(output),
            Ok(Err(error)) => {
                vault_logs::error!("{} task failed: {error:#}", H::SERVICE_NAME);
                TaskResult::Failed {
                    error_message: format!("{error:#}"),
                }
            }
            Err(join_error) => {
                let error_message = try_extract_panic_message(join_error);
                vault_logs::error!("{} task panicked: {error_message}", H::SERVICE_NAME);
                TaskResult::Failed { error_message }
            }
        };

        // Enqueue the completion before decrementing, so that a driver woken
        // by `await_all_tasks` always finds every completion already queued.
        let send_result = completion_sender.send(TaskCompletion { task, result });
        in_flight.fetch_sub(1, Ordering::SeqCst);
        if send_result.is_err() {
            // The driver is gone; nothing left to report to.
            break;
        }
    }
}
