//! # Cola de Jobs
//! src/jobs/queue.rs
//!
//! Cola FIFO acotada de ids de jobs pendientes. Los workers esperan con
//! `dequeue().await`; `enqueue` nunca bloquea y falla si la cola está llena.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::SubmitError;

pub struct JobQueue {
    items: Mutex<VecDeque<String>>,
    notify: Notify,
    max_capacity: usize,
}

impl JobQueue {
    pub fn new(max_capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(max_capacity)),
            notify: Notify::new(),
            max_capacity,
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encola un job al final
    ///
    /// Retorna `QueueFull` si se alcanzó la capacidad máxima
    pub fn enqueue(&self, job_id: String) -> Result<(), SubmitError> {
        {
            let mut items = self.items();
            if items.len() >= self.max_capacity {
                return Err(SubmitError::QueueFull(self.max_capacity));
            }
            items.push_back(job_id);
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Desencola el job más antiguo, esperando si la cola está vacía
    pub async fn dequeue(&self) -> String {
        loop {
            if let Some(job_id) = self.try_dequeue() {
                return job_id;
            }
            self.notify.notified().await;
        }
    }

    /// Intenta desencolar sin esperar
    pub fn try_dequeue(&self) -> Option<String> {
        let (job_id, remaining) = {
            let mut items = self.items();
            let job_id = items.pop_front();
            (job_id, items.len())
        };

        // Si quedan jobs, despertar a otro worker
        if job_id.is_some() && remaining > 0 {
            self.notify.notify_one();
        }
        job_id
    }

    /// Remueve un job específico (cancelación de un PENDING)
    pub fn remove_by_id(&self, job_id: &str) -> bool {
        let mut items = self.items();
        match items.iter().position(|id| id == job_id) {
            Some(idx) => items.remove(idx).is_some(),
            None => false,
        }
    }

    /// Vacía la cola y retorna los ids que quedaban
    pub fn drain(&self) -> Vec<String> {
        self.items().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = JobQueue::new(10);
        queue.enqueue("a".to_string()).unwrap();
        queue.enqueue("b".to_string()).unwrap();
        queue.enqueue("c".to_string()).unwrap();

        assert_eq!(queue.try_dequeue().as_deref(), Some("a"));
        assert_eq!(queue.try_dequeue().as_deref(), Some("b"));
        assert_eq!(queue.try_dequeue().as_deref(), Some("c"));
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_queue_capacity() {
        let queue = JobQueue::new(2);
        queue.enqueue("a".to_string()).unwrap();
        queue.enqueue("b".to_string()).unwrap();
        assert_eq!(queue.len(), queue.max_capacity());

        let result = queue.enqueue("c".to_string());
        assert!(matches!(result, Err(SubmitError::QueueFull(2))));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_by_id() {
        let queue = JobQueue::new(10);
        for id in ["a", "b", "c"] {
            queue.enqueue(id.to_string()).unwrap();
        }

        assert!(queue.remove_by_id("b"));
        assert!(!queue.remove_by_id("b"));
        assert_eq!(queue.drain(), vec!["a".to_string(), "c".to_string()]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(JobQueue::new(10));

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.enqueue("job-1".to_string()).unwrap();
        let job_id = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job_id, "job-1");
    }

    #[tokio::test]
    async fn test_multiple_waiters_all_get_work() {
        let queue = Arc::new(JobQueue::new(10));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.dequeue().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        for id in ["a", "b", "c"] {
            queue.enqueue(id.to_string()).unwrap();
        }

        let mut got = Vec::new();
        for waiter in waiters {
            got.push(
                tokio::time::timeout(Duration::from_secs(1), waiter)
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        got.sort();
        assert_eq!(got, vec!["a", "b", "c"]);
    }
}
