//! In-process queue transport
//!
//! Behaves like a single broker node: FIFO queues, one sequential delivery
//! task per consumer, acknowledgement when the handler returns, idle-queue
//! expiry for queues declared with a TTL and `auto_delete` on close.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{ConsumerHandle, DeliveryHandler, QueueOptions, QueueTransport, TransportError};

#[derive(Debug)]
struct MemoryQueue {
    options: QueueOptions,
    messages: VecDeque<Bytes>,
    consumers: usize,
    last_used: Instant,
    generation: u64,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    fn is_expired(&self, now: Instant) -> bool {
        match self.options.ttl {
            Some(ttl) => self.consumers == 0 && now.duration_since(self.last_used) >= ttl,
            None => false,
        }
    }

    fn wake_all(&self) {
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

type QueueMap = HashMap<String, MemoryQueue>;

struct ConsumerEntry {
    queue: String,
    generation: u64,
    task: JoinHandle<()>,
}

/// Queue transport backed by process memory
pub struct MemoryQueueTransport {
    queues: Arc<Mutex<QueueMap>>,
    consumers: Mutex<HashMap<u64, ConsumerEntry>>,
    next_consumer: AtomicU64,
    next_generation: AtomicU64,
}

impl MemoryQueueTransport {
    /// Empty broker
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            consumers: Mutex::new(HashMap::new()),
            next_consumer: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
        }
    }

    fn purge_expired(queues: &mut QueueMap) {
        let now = Instant::now();
        queues.retain(|name, queue| {
            let expired = queue.is_expired(now);
            if expired {
                debug!(queue = %name, "Queue expired after idle TTL");
                queue.wake_all();
            }
            !expired
        });
    }

    /// Delete a queue regardless of consumers, as a broker operator would.
    ///
    /// Active consumers of the queue receive an error and stop.
    pub fn delete_queue(&self, name: &str) -> bool {
        let removed = self.queues.lock().remove(name);
        match removed {
            Some(queue) => {
                queue.wake_all();
                debug!(queue = %name, "Queue deleted");
                true
            }
            None => false,
        }
    }

    /// Remove and return every pending message of a queue.
    pub fn drain(&self, name: &str) -> Vec<Bytes> {
        let mut queues = self.queues.lock();
        match queues.get_mut(name) {
            Some(queue) => {
                queue.last_used = Instant::now();
                queue.messages.drain(..).collect()
            }
            None => Vec::new(),
        }
    }

    /// Number of pending messages, or `None` if the queue does not exist.
    pub fn len(&self, name: &str) -> Option<usize> {
        let mut queues = self.queues.lock();
        Self::purge_expired(&mut queues);
        queues.get(name).map(|queue| queue.messages.len())
    }

    /// Names of the existing queues, sorted
    pub fn queue_names(&self) -> Vec<String> {
        let mut queues = self.queues.lock();
        Self::purge_expired(&mut queues);
        queues.keys().cloned().collect()
    }

    /// Consumers currently attached to `name`
    pub fn consumer_count(&self, name: &str) -> usize {
        self.queues.lock().get(name).map(|queue| queue.consumers).unwrap_or(0)
    }

    async fn run_consumer(
        queues: Arc<Mutex<QueueMap>>,
        name: String,
        generation: u64,
        handler: Arc<dyn DeliveryHandler>,
    ) {
        loop {
            let next = {
                let mut guard = queues.lock();
                match guard.get_mut(&name) {
                    Some(queue) if queue.generation == generation => {
                        let message = queue.messages.pop_front();
                        if message.is_some() {
                            queue.last_used = Instant::now();
                        }
                        Ok((message, queue.notify.clone()))
                    }
                    _ => Err(TransportError::QueueNotFound(name.clone())),
                }
            };

            match next {
                Ok((Some(payload), _)) => {
                    trace!(queue = %name, bytes = payload.len(), "Delivering message");
                    if let Err(e) = handler.on_message(payload).await {
                        // Rejected without requeue so a bad message cannot wedge the queue.
                        warn!(queue = %name, error = %e, "Message rejected by consumer");
                    }
                }
                Ok((None, notify)) => notify.notified().await,
                Err(e) => {
                    handler.on_error(e).await;
                    break;
                }
            }
        }
    }
}

impl Default for MemoryQueueTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryQueueTransport {
    fn drop(&mut self) {
        for (_, entry) in self.consumers.lock().drain() {
            entry.task.abort();
        }
    }
}

#[async_trait]
impl QueueTransport for MemoryQueueTransport {
    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<(), TransportError> {
        let mut queues = self.queues.lock();
        Self::purge_expired(&mut queues);

        if let Some(queue) = queues.get_mut(name) {
            queue.last_used = Instant::now();
            return Ok(());
        }

        queues.insert(
            name.to_string(),
            MemoryQueue {
                options: options.clone(),
                messages: VecDeque::new(),
                consumers: 0,
                last_used: Instant::now(),
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                notify: Arc::new(Notify::new()),
            },
        );
        debug!(queue = %name, ?options, "Queue declared");
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Bytes) -> Result<(), TransportError> {
        let mut queues = self.queues.lock();
        Self::purge_expired(&mut queues);

        let target = queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;
        target.messages.push_back(payload);
        target.last_used = Instant::now();
        target.notify.notify_one();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<ConsumerHandle, TransportError> {
        let generation = {
            let mut queues = self.queues.lock();
            Self::purge_expired(&mut queues);

            let target = queues
                .get_mut(queue)
                .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;
            if target.options.exclusive && target.consumers > 0 {
                return Err(TransportError::Exclusive(queue.to_string()));
            }
            target.consumers += 1;
            target.last_used = Instant::now();
            target.generation
        };

        let id = self.next_consumer.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(Self::run_consumer(
            self.queues.clone(),
            queue.to_string(),
            generation,
            handler,
        ));
        self.consumers.lock().insert(
            id,
            ConsumerEntry {
                queue: queue.to_string(),
                generation,
                task,
            },
        );

        debug!(queue = %queue, consumer = id, "Consumer started");
        Ok(ConsumerHandle {
            id,
            queue: queue.to_string(),
        })
    }

    async fn cancel_consumer(&self, handle: &ConsumerHandle) -> Result<(), TransportError> {
        let entry = self
            .consumers
            .lock()
            .remove(&handle.id)
            .ok_or(TransportError::ConsumerNotFound(handle.id))?;
        entry.task.abort();

        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get_mut(&entry.queue) {
            if queue.generation == entry.generation {
                queue.consumers = queue.consumers.saturating_sub(1);
                queue.last_used = Instant::now();
            }
        }
        debug!(consumer = %handle, "Consumer cancelled");
        Ok(())
    }

    async fn close_queue(&self, name: &str) -> Result<(), TransportError> {
        let mut queues = self.queues.lock();
        let remove = queues
            .get(name)
            .map(|queue| queue.options.auto_delete && queue.consumers == 0)
            .unwrap_or(false);
        if remove {
            if let Some(queue) = queues.remove(name) {
                queue.wake_all();
            }
            debug!(queue = %name, "Auto-delete queue removed on close");
        }
        Ok(())
    }

    async fn queue_exists(&self, name: &str) -> Result<bool, TransportError> {
        let mut queues = self.queues.lock();
        Self::purge_expired(&mut queues);
        Ok(queues.contains_key(name))
    }
}
