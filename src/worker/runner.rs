//! Task-execution threads that pull messages from the broker.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use metrics::counter;
use tracing::{debug, error, info, info_span, warn};

use super::context::WorkerContext;
use super::tasks::{self, TaskOptions, TaskOutcome};
use crate::error::QueueError;
use crate::infrastructure::queue::{Delivery, TaskConsumer};

/// Settings shared by every task thread.
#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    /// How long one dequeue call may block.
    pub poll_interval: Duration,
    pub task: TaskOptions,
}

/// A fixed set of task threads, one broker consumer each.
///
/// A thread acknowledges a message only after its task succeeded, records
/// ordinary task failures on the broker, and leaves the message in flight and
/// exits on a lifecycle failure. A task that panics on the loop counts as an
/// ordinary failure.
pub struct TaskRunner {
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl TaskRunner {
    /// Starts one thread per consumer.
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned. Threads started before the
    /// failure are stopped again.
    pub fn spawn<C>(
        context: Arc<WorkerContext>,
        consumers: Vec<C>,
        options: RunnerOptions,
    ) -> std::io::Result<Self>
    where
        C: TaskConsumer + 'static,
    {
        let mut runner = Self {
            stop: Arc::new(AtomicBool::new(false)),
            threads: Vec::with_capacity(consumers.len()),
        };

        for (index, mut consumer) in consumers.into_iter().enumerate() {
            let context = context.clone();
            let stop = runner.stop.clone();

            let spawned = thread::Builder::new()
                .name(format!("visit-task-{index}"))
                .spawn(move || consume(index, &context, &mut consumer, &stop, options));

            match spawned {
                Ok(handle) => runner.threads.push(handle),
                Err(e) => {
                    runner.shutdown();
                    return Err(e);
                }
            }
        }

        info!("Started {} task threads", runner.threads.len());
        Ok(runner)
    }

    /// Number of task threads still running.
    pub fn active(&self) -> usize {
        self.threads.iter().filter(|t| !t.is_finished()).count()
    }

    /// Stops pulling from the broker and joins every thread.
    ///
    /// A thread finishes the task it is running first, so the wait is bounded by
    /// the poll interval plus the persist timeout.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::Release);

        for handle in self.threads {
            let name = handle.thread().name().unwrap_or("task").to_string();
            if handle.join().is_err() {
                error!("Task thread {} panicked", name);
            }
        }

        info!("Task threads stopped");
    }
}

fn consume<C: TaskConsumer>(
    worker: usize,
    context: &WorkerContext,
    consumer: &mut C,
    stop: &AtomicBool,
    options: RunnerOptions,
) {
    debug!(worker, "Task thread started");

    while !stop.load(Ordering::Acquire) {
        let delivery = match consumer.dequeue(options.poll_interval) {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(QueueError::Malformed(e)) => {
                warn!(worker, "Discarded malformed message: {}", e);
                counter!("visits_failed_total").increment(1);
                continue;
            }
            Err(e) => {
                error!(worker, "Broker error: {}", e);
                thread::sleep(options.poll_interval);
                continue;
            }
        };

        if handle(context, consumer, &delivery, options.task).is_break() {
            break;
        }
    }

    debug!(worker, "Task thread exiting");
}

fn handle<C: TaskConsumer>(
    context: &WorkerContext,
    consumer: &mut C,
    delivery: &Delivery,
    options: TaskOptions,
) -> ControlFlow<()> {
    let span = info_span!("task", id = %delivery.message.id, name = %delivery.message.task);
    let _entered = span.enter();

    match tasks::dispatch(context, &delivery.message, options) {
        Ok(outcome) => {
            match outcome {
                TaskOutcome::Recorded(visit) => {
                    debug!(visit_id = %visit.id, "Visit recorded");
                    counter!("visits_persisted_total").increment(1);
                }
                TaskOutcome::Duplicate => {
                    debug!("Delivery already recorded");
                    counter!("visits_duplicate_total").increment(1);
                }
            }
            if let Err(e) = consumer.ack(delivery) {
                error!("Failed to acknowledge message: {}", e);
            }
            ControlFlow::Continue(())
        }
        Err(e) if e.is_lifecycle() => {
            error!("Task aborted, message left unacknowledged: {}", e);
            ControlFlow::Break(())
        }
        Err(e) => {
            warn!("Task failed: {}", e);
            counter!("visits_failed_total").increment(1);
            if let Err(qe) = consumer.fail(delivery, &e.to_string()) {
                error!("Failed to record task failure: {}", qe);
            }
            ControlFlow::Continue(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::domain::entities::{NewVisit, Visit};
    use crate::domain::repositories::{MockVisitRepository, VisitRepository};
    use crate::domain::visit_event::{TaskMessage, VisitEvent};
    use crate::error::PersistenceError;
    use crate::infrastructure::queue::{MemoryQueue, VisitQueue};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    /// Panics on inserts from one IP, records everything else.
    struct PanicsOnIp {
        poisoned_ip: &'static str,
        recorded: AtomicUsize,
    }

    #[async_trait]
    impl VisitRepository for PanicsOnIp {
        async fn record(&self, new_visit: NewVisit) -> Result<Visit, PersistenceError> {
            if new_visit.ip_address == self.poisoned_ip {
                panic!("cannot encode visit from {}", new_visit.ip_address);
            }
            self.recorded.fetch_add(1, Ordering::SeqCst);
            Ok(stored(new_visit))
        }

        async fn record_once(
            &self,
            new_visit: NewVisit,
            _dedup_key: &str,
        ) -> Result<Option<Visit>, PersistenceError> {
            self.record(new_visit).await.map(Some)
        }

        async fn count_for_short_url(&self, _short_url_id: Uuid) -> Result<i64, PersistenceError> {
            Ok(self.recorded.load(Ordering::SeqCst) as i64)
        }

        async fn close(&self) {}
    }

    fn options() -> RunnerOptions {
        RunnerOptions {
            poll_interval: Duration::from_millis(20),
            task: TaskOptions::default(),
        }
    }

    fn stored(new_visit: NewVisit) -> Visit {
        Visit {
            id: Uuid::new_v4(),
            short_url_id: new_visit.short_url_id,
            visited_at: Utc::now(),
            ip_address: new_visit.ip_address,
            user_agent: new_visit.user_agent,
        }
    }

    fn running(mock: MockVisitRepository) -> Arc<WorkerContext> {
        let context = Arc::new(WorkerContext::new(&WorkerConfig::default()));
        context
            .start(move || async move { Ok(Arc::new(mock) as Arc<dyn VisitRepository>) })
            .unwrap();
        context
    }

    fn enqueue(queue: &MemoryQueue, event: &VisitEvent) {
        let message = TaskMessage::record_visit(event).unwrap();
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(queue.enqueue(message))
            .unwrap();
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !condition() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_successful_task_is_acknowledged() {
        let mut mock = MockVisitRepository::new();
        mock.expect_record()
            .times(3)
            .returning(|new_visit| Ok(stored(new_visit)));
        mock.expect_close().return_const(());
        let context = running(mock);
        let queue = MemoryQueue::new();
        for _ in 0..3 {
            enqueue(&queue, &VisitEvent::new(Uuid::new_v4(), "10.0.0.1", "UA"));
        }

        let runner = TaskRunner::spawn(context.clone(), vec![queue.clone(), queue.clone()], options())
            .unwrap();
        wait_until(|| queue.is_empty() && queue.in_flight() == 0);
        runner.shutdown();

        assert!(queue.is_empty());
        assert_eq!(queue.in_flight(), 0);
        assert!(queue.failed().is_empty());
        context.stop().unwrap();
    }

    #[test]
    fn test_failed_task_is_recorded_as_failed() {
        let mut mock = MockVisitRepository::new();
        mock.expect_record().times(1).returning(|new_visit| {
            Err(PersistenceError::UnknownShortUrl {
                short_url_id: new_visit.short_url_id,
            })
        });
        mock.expect_close().return_const(());
        let context = running(mock);
        let queue = MemoryQueue::new();
        enqueue(&queue, &VisitEvent::new(Uuid::new_v4(), "10.0.0.1", "UA"));

        let runner = TaskRunner::spawn(context.clone(), vec![queue.clone()], options()).unwrap();
        wait_until(|| !queue.failed().is_empty());
        runner.shutdown();

        let failed = queue.failed();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].1.contains("does not exist"));
        assert_eq!(queue.in_flight(), 0);
        context.stop().unwrap();
    }

    #[test]
    fn test_lifecycle_failure_leaves_message_in_flight() {
        let context = Arc::new(WorkerContext::new(&WorkerConfig::default()));
        let queue = MemoryQueue::new();
        enqueue(&queue, &VisitEvent::new(Uuid::new_v4(), "10.0.0.1", "UA"));

        let runner = TaskRunner::spawn(context, vec![queue.clone()], options()).unwrap();
        wait_until(|| runner.active() == 0);

        assert_eq!(runner.active(), 0);
        assert_eq!(queue.in_flight(), 1);
        assert!(queue.failed().is_empty());
        runner.shutdown();

        assert_eq!(queue.redeliver_unacked(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_malformed_message_does_not_stop_thread() {
        let mut mock = MockVisitRepository::new();
        mock.expect_record()
            .times(1)
            .returning(|new_visit| Ok(stored(new_visit)));
        mock.expect_close().return_const(());
        let context = running(mock);
        let queue = MemoryQueue::new();
        queue.push_raw("{not json");
        enqueue(&queue, &VisitEvent::new(Uuid::new_v4(), "10.0.0.1", "UA"));

        let runner = TaskRunner::spawn(context.clone(), vec![queue.clone()], options()).unwrap();
        wait_until(|| queue.is_empty() && queue.in_flight() == 0);

        assert_eq!(runner.active(), 1);
        runner.shutdown();
        assert_eq!(queue.failed().len(), 1);
        context.stop().unwrap();
    }

    #[test]
    fn test_panicking_task_is_failed_and_thread_keeps_consuming() {
        let visits = Arc::new(PanicsOnIp {
            poisoned_ip: "192.0.2.66",
            recorded: AtomicUsize::new(0),
        });
        let context = Arc::new(WorkerContext::new(&WorkerConfig::default()));
        let engine = visits.clone();
        context
            .start(move || async move { Ok(engine as Arc<dyn VisitRepository>) })
            .unwrap();

        let queue = MemoryQueue::new();
        enqueue(&queue, &VisitEvent::new(Uuid::new_v4(), "192.0.2.66", "UA"));
        enqueue(&queue, &VisitEvent::new(Uuid::new_v4(), "10.0.0.1", "UA"));
        enqueue(&queue, &VisitEvent::new(Uuid::new_v4(), "10.0.0.2", "UA"));

        let runner = TaskRunner::spawn(context.clone(), vec![queue.clone()], options()).unwrap();
        wait_until(|| queue.is_empty() && queue.in_flight() == 0);

        assert_eq!(runner.active(), 1);
        runner.shutdown();
        assert_eq!(queue.failed().len(), 1);
        assert!(queue.failed()[0].1.contains("aborted"));
        assert_eq!(visits.recorded.load(Ordering::SeqCst), 2);
        assert_eq!(context.state(), crate::worker::LifecycleState::Running);
        context.stop().unwrap();
    }
}
