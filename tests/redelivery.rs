mod common;

use shortlink_telemetry::config::WorkerConfig;
use shortlink_telemetry::domain::visit_event::VisitEvent;
use shortlink_telemetry::infrastructure::queue::{MemoryQueue, TaskConsumer};
use shortlink_telemetry::worker::tasks::{self, TaskOptions, TaskOutcome};
use std::time::Duration;
use uuid::Uuid;

const WAIT: Duration = Duration::from_millis(50);

/// Delivers one message twice: the first delivery is processed but never
/// acknowledged, as if the worker crashed right after the insert.
fn deliver_twice(options: TaskOptions) -> (Vec<TaskOutcome>, usize) {
    let config = WorkerConfig {
        deduplicate: options.deduplicate,
        ..common::worker_config()
    };
    let visits = common::InMemoryVisits::new();
    let context = common::running_context(&config, visits.clone());
    let queue = MemoryQueue::new();
    let mut consumer = queue.clone();
    let sent = common::enqueue_visit(&queue, &VisitEvent::new(Uuid::new_v4(), "10.0.0.1", "UA"));

    let first = consumer.dequeue(WAIT).unwrap().unwrap();
    let first_outcome = tasks::dispatch(&context, &first.message, options).unwrap();

    assert_eq!(consumer.recover().unwrap(), 1);

    let second = consumer.dequeue(WAIT).unwrap().unwrap();
    assert_eq!(second.message.id, sent.id);
    let second_outcome = tasks::dispatch(&context, &second.message, options).unwrap();
    consumer.ack(&second).unwrap();

    assert!(queue.is_empty());
    assert_eq!(queue.in_flight(), 0);

    context.stop().unwrap();
    (vec![first_outcome, second_outcome], visits.count())
}

#[test]
fn test_redelivered_message_is_recorded_twice_by_default() {
    let (outcomes, stored) = deliver_twice(TaskOptions::default());

    assert!(
        outcomes
            .iter()
            .all(|o| matches!(o, TaskOutcome::Recorded(_)))
    );
    assert_eq!(stored, 2);
}

#[test]
fn test_redelivered_message_is_recorded_once_with_dedup() {
    let (outcomes, stored) = deliver_twice(TaskOptions { deduplicate: true });

    assert!(matches!(outcomes[0], TaskOutcome::Recorded(_)));
    assert_eq!(outcomes[1], TaskOutcome::Duplicate);
    assert_eq!(stored, 1);
}

#[test]
fn test_distinct_messages_for_same_event_are_both_recorded_with_dedup() {
    let visits = common::InMemoryVisits::new();
    let context = common::running_context(&common::worker_config(), visits.clone());
    let queue = MemoryQueue::new();
    let mut consumer = queue.clone();
    let event = VisitEvent::new(Uuid::new_v4(), "10.0.0.1", "UA");
    common::enqueue_visit(&queue, &event);
    common::enqueue_visit(&queue, &event);

    let options = TaskOptions { deduplicate: true };
    for _ in 0..2 {
        let delivery = consumer.dequeue(WAIT).unwrap().unwrap();
        tasks::dispatch(&context, &delivery.message, options).unwrap();
        consumer.ack(&delivery).unwrap();
    }

    // Two redirects are two visits, even with identical fields.
    assert_eq!(visits.count(), 2);
    context.stop().unwrap();
}
