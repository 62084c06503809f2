/// Delivery loops: the single thread consumer callbacks run on
///
/// `ThreadLoop` owns a dedicated thread fed by a tokio channel. `ManualLoop`
/// runs tasks only when asked to, on the thread that created it; tests and
/// embedders with their own main loop use it.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait DeliveryLoop: Send + Sync {
    /// Enqueue `task`; tasks run one at a time in posting order
    fn post(&self, task: Task);

    /// Whether the caller is running on the loop thread
    fn is_loop_thread(&self) -> bool;
}

// ============================================================================
// MANUAL LOOP
// ============================================================================

pub struct ManualLoop {
    owner: ThreadId,
    tasks: Mutex<VecDeque<Task>>,
}

impl Default for ManualLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualLoop {
    /// The calling thread becomes the loop thread
    pub fn new() -> Self {
        Self {
            owner: thread::current().id(),
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run the oldest task. Returns false if there was none.
    pub fn run_one(&self) -> bool {
        let task = self.tasks.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run until the queue is empty, including tasks posted meanwhile
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl DeliveryLoop for ManualLoop {
    fn post(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }

    fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.owner
    }
}

// ============================================================================
// THREAD LOOP
// ============================================================================

pub struct ThreadLoop {
    sender: Option<mpsc::UnboundedSender<Task>>,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl ThreadLoop {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(task) = receiver.blocking_recv() {
                    task();
                }
                debug!("delivery loop stopped");
            })?;
        let thread_id = handle.thread().id();
        debug!("delivery loop {} started", name);
        Ok(Self {
            sender: Some(sender),
            thread_id,
            handle: Some(handle),
        })
    }
}

impl DeliveryLoop for ThreadLoop {
    fn post(&self, task: Task) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(task).is_err() {
            warn!("delivery loop closed, task dropped");
        }
    }

    fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for ThreadLoop {
    fn drop(&mut self) {
        // closing the channel ends the thread after the queued tasks ran
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if thread::current().id() != self.thread_id && handle.join().is_err() {
                warn!("delivery loop panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc as std_mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn test_manual_loop_runs_in_order() {
        let looper = ManualLoop::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            looper.post(Box::new(move || log.lock().push(i)));
        }
        assert_eq!(looper.pending(), 3);
        assert_eq!(looper.run_pending(), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_manual_loop_runs_tasks_posted_while_running() {
        let looper = Arc::new(ManualLoop::new());
        let count = Arc::new(AtomicUsize::new(0));
        let inner_loop = looper.clone();
        let inner_count = count.clone();
        looper.post(Box::new(move || {
            inner_count.fetch_add(1, Ordering::SeqCst);
            let c = inner_count.clone();
            inner_loop.post(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }));
        assert_eq!(looper.run_pending(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_manual_loop_thread_identity() {
        let looper = Arc::new(ManualLoop::new());
        assert!(looper.is_loop_thread());
        let other = looper.clone();
        let on_loop = thread::spawn(move || other.is_loop_thread())
            .join()
            .expect("join");
        assert!(!on_loop);
    }

    #[test]
    fn test_thread_loop_runs_tasks_on_its_thread() {
        let looper = Arc::new(ThreadLoop::spawn("test-delivery").expect("spawn"));
        assert!(!looper.is_loop_thread());

        let (tx, rx) = std_mpsc::channel();
        let probe = looper.clone();
        looper.post(Box::new(move || {
            tx.send(probe.is_loop_thread()).expect("send");
        }));
        let on_loop = rx.recv_timeout(Duration::from_secs(5)).expect("task ran");
        assert!(on_loop);
    }

    #[test]
    fn test_thread_loop_drop_drains_queue() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let looper = ThreadLoop::spawn("test-drain").expect("spawn");
            for _ in 0..10 {
                let c = count.clone();
                looper.post(Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }
}
