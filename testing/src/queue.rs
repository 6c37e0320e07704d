//! In-memory task queue.

use collegium_core::queue::{QueueError, QueuedTask, TaskQueue, TaskStream};
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Per-queue FIFO buffer with [`TaskQueue`] semantics.
///
/// Tasks enqueued before any subscriber exists are buffered, matching a
/// durable broker. Every subscriber to the same queue competes for tasks
/// (work sharing, not fan-out), mirroring consumer-group behavior.
#[derive(Default)]
pub struct InMemoryTaskQueue {
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
}

#[derive(Default)]
struct QueueState {
    tasks: Mutex<VecDeque<QueuedTask>>,
    notify: Notify,
}

impl InMemoryTaskQueue {
    /// Create an empty queue set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn state(&self, queue: &str) -> Arc<QueueState> {
        let mut queues = self.queues.lock().await;
        Arc::clone(queues.entry(queue.to_string()).or_default())
    }

    /// Number of buffered tasks on a queue.
    pub async fn depth(&self, queue: &str) -> usize {
        let state = self.state(queue).await;
        let depth = state.tasks.lock().await.len();
        depth
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn enqueue(
        &self,
        queue: &str,
        task: &QueuedTask,
    ) -> BoxFuture<'_, Result<(), QueueError>> {
        let queue = queue.to_string();
        let task = task.clone();
        Box::pin(async move {
            let state = self.state(&queue).await;
            state.tasks.lock().await.push_back(task);
            state.notify.notify_one();
            Ok(())
        })
    }

    fn subscribe(
        &self,
        queue: &str,
        _prefetch: usize,
    ) -> BoxFuture<'_, Result<TaskStream, QueueError>> {
        let queue = queue.to_string();
        Box::pin(async move {
            let state = self.state(&queue).await;
            let stream = async_stream::stream! {
                loop {
                    let task = loop {
                        {
                            let mut tasks = state.tasks.lock().await;
                            if let Some(task) = tasks.pop_front() {
                                break task;
                            }
                        }
                        state.notify.notified().await;
                    };
                    // Wake a sibling consumer in case more work is buffered.
                    state.notify.notify_one();
                    yield Ok(task);
                }
                #[allow(unreachable_code)]
                {}
            };
            Ok(Box::pin(stream) as TaskStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    fn task(n: u8) -> QueuedTask {
        QueuedTask::new(format!("t{n}"), vec![n], None)
    }

    #[tokio::test]
    async fn tasks_survive_until_subscription() {
        let mq = InMemoryTaskQueue::new();
        mq.enqueue("q", &task(1)).await.expect("enqueue");
        mq.enqueue("q", &task(2)).await.expect("enqueue");
        assert_eq!(mq.depth("q").await, 2);

        let mut stream = mq.subscribe("q", 10).await.expect("subscribe");
        let first = stream.next().await.expect("item").expect("task");
        let second = stream.next().await.expect("item").expect("task");
        assert_eq!(first.task_type, "t1");
        assert_eq!(second.task_type, "t2");
    }

    #[tokio::test]
    async fn subscriber_wakes_on_later_enqueue() {
        let mq = Arc::new(InMemoryTaskQueue::new());
        let mut stream = mq.subscribe("q", 10).await.expect("subscribe");

        let producer = Arc::clone(&mq);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.enqueue("q", &task(9)).await.expect("enqueue");
        });

        let got = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("should wake")
            .expect("item")
            .expect("task");
        assert_eq!(got.task_type, "t9");
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let mq = InMemoryTaskQueue::new();
        mq.enqueue("a", &task(1)).await.expect("enqueue");
        assert_eq!(mq.depth("a").await, 1);
        assert_eq!(mq.depth("b").await, 0);
    }
}
