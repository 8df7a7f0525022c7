use std::{collections::VecDeque, sync::Arc};
use tokio::sync::{Mutex, Notify};
use crate::PieceWork;

// Pieces still to be downloaded, shared between every peer worker.
// A piece is always in exactly one place: queued, assigned to a worker, or done.
#[derive(Debug, Clone)]
pub struct WorkQueue(Arc<Shared>);

#[derive(Debug)]
struct Shared {

    state: Mutex<QueueState>,

    // Woken whenever a piece is returned or finished, or the queue closes.
    notify: Notify,

}

#[derive(Debug, Default)]
struct QueueState {

    queue: VecDeque<PieceWork>,

    // Pieces handed out which haven't been completed or requeued.
    assigned: usize,

    closed: bool,

}

impl WorkQueue {

    pub fn new(work: Vec<PieceWork>) -> Self {
        Self(Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: work.into(),
                ..Default::default()
            }),
            notify: Notify::new(),
        }))
    }

    // Takes the first queued piece accepted by `wanted`, pieces that aren't wanted
    // keep their place. If nothing is wanted but other workers still hold pieces,
    // waits for one of them to come back. Returns None once the queue is closed,
    // or when nothing is wanted and nothing is assigned, so no more work can appear.
    pub async fn pop_matching<F>(&self, mut wanted: F) -> Option<PieceWork>
    where
        F: FnMut(&PieceWork) -> bool,
    {
        loop {
            // Register before inspecting so a wakeup between the check and the
            // await isn't lost.
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.0.state.lock().await;
                if state.closed {
                    return None;
                }
                if let Some(pos) = state.queue.iter().position(|w| wanted(w)) {
                    let work = state.queue.remove(pos);
                    if work.is_some() {
                        state.assigned += 1;
                    }
                    return work;
                }
                if state.assigned == 0 {
                    return None;
                }
            }

            tracing::trace!("no wanted pieces available, waiting");
            notified.await;
        }
    }

    // Returns an assigned piece to the back of the queue.
    pub async fn requeue(&self, work: PieceWork) {
        let mut state = self.0.state.lock().await;
        state.assigned = state.assigned.saturating_sub(1);
        state.queue.push_back(work);
        drop(state);
        self.0.notify.notify_waiters();
    }

    // Marks an assigned piece as finished with.
    pub async fn complete(&self) {
        let mut state = self.0.state.lock().await;
        state.assigned = state.assigned.saturating_sub(1);
        drop(state);
        self.0.notify.notify_waiters();
    }

    // Stops handing out work and releases every waiting worker.
    pub async fn close(&self) {
        self.0.state.lock().await.closed = true;
        self.0.notify.notify_waiters();
    }

    // Number of pieces waiting in the queue.
    pub async fn len(&self) -> usize {
        self.0.state.lock().await.queue.len()
    }

    pub async fn num_assigned(&self) -> usize {
        self.0.state.lock().await.assigned
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};
    use tokio::time;
    use super::*;

    fn work(num: u32) -> Vec<PieceWork> {
        (0..num).map(|idx| PieceWork { idx, hash: [idx as u8; 20], len: 10 }).collect()
    }

    #[tokio::test]
    async fn test_pop_in_order() {
        let queue = WorkQueue::new(work(3));
        assert_eq!(queue.pop_matching(|_| true).await.unwrap().idx, 0);
        assert_eq!(queue.pop_matching(|_| true).await.unwrap().idx, 1);
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.num_assigned().await, 2);
    }

    #[tokio::test]
    async fn test_pop_skips_unwanted() {
        let queue = WorkQueue::new(work(4));
        let w = queue.pop_matching(|w| w.idx == 2).await.unwrap();
        assert_eq!(w.idx, 2);
        // Skipped pieces keep their order.
        assert_eq!(queue.pop_matching(|_| true).await.unwrap().idx, 0);
        assert_eq!(queue.pop_matching(|_| true).await.unwrap().idx, 1);
        assert_eq!(queue.pop_matching(|_| true).await.unwrap().idx, 3);
    }

    #[tokio::test]
    async fn test_empty_queue_returns_none() {
        let queue = WorkQueue::new(Vec::new());
        assert!(queue.pop_matching(|_| true).await.is_none());
    }

    #[tokio::test]
    async fn test_nothing_wanted_nothing_assigned_returns_none() {
        let queue = WorkQueue::new(work(2));
        assert!(queue.pop_matching(|w| w.idx == 5).await.is_none());
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_waits_for_requeue() {
        let queue = WorkQueue::new(work(1));
        let held = queue.pop_matching(|_| true).await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop_matching(|_| true).await })
        };
        time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.requeue(held).await;
        let got = time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(got.unwrap().idx, 0);
    }

    #[tokio::test]
    async fn test_waiter_released_when_last_piece_completes() {
        let queue = WorkQueue::new(work(2));
        let _first = queue.pop_matching(|w| w.idx == 0).await.unwrap();

        // Only wants piece 0, which is assigned elsewhere.
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop_matching(|w| w.idx == 0).await })
        };
        time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.complete().await;
        let got = time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let queue = WorkQueue::new(work(1));
        let _held = queue.pop_matching(|_| true).await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop_matching(|_| true).await })
        };
        time::sleep(Duration::from_millis(20)).await;
        queue.close().await;
        let got = time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(got.is_none());
        assert!(queue.pop_matching(|_| true).await.is_none());
    }

    // Pieces bounce between workers but are never lost or duplicated.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_workers() {
        let queue = WorkQueue::new(work(50));
        let mut handles = Vec::new();
        for w in 0..8u32 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut done = Vec::new();
                let mut attempts = 0u32;
                while let Some(piece) = queue.pop_matching(|_| true).await {
                    attempts += 1;
                    if (piece.idx + w + attempts) % 3 == 0 {
                        queue.requeue(piece).await;
                    } else {
                        done.push(piece.idx);
                        queue.complete().await;
                    }
                    tokio::task::yield_now().await;
                }
                done
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for idx in handle.await.unwrap() {
                assert!(seen.insert(idx), "piece {} completed twice", idx);
            }
        }
        assert_eq!(seen.len(), 50);
        assert_eq!(queue.num_assigned().await, 0);
    }
}
