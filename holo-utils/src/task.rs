//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use derive_new::new;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task;
use tokio::time::Instant;
use tracing::{Instrument, error};

/// A handle which can be used to manipulate the task created by the
/// [`Task::spawn`] function.
///
/// By default, dropping this handle cancels the task (unless [`Task::detach`]
/// is used).
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// A handle which can be used to manipulate the timeout task created by the
/// [`TimeoutTask::new`] function.
///
/// Dropping this handle cancels the timeout task.
#[derive(Debug)]
pub struct TimeoutTask {
    _task: Task<()>,
    control: UnboundedSender<Message>,
    next: Arc<Mutex<Instant>>,
}

#[derive(Debug)]
enum Message {
    Reset(Option<Duration>),
}

/// One-shot named timers.
///
/// Scheduling a key that is already armed replaces the previous deadline.
/// Expired keys are handed back to the owner of the timers, which feeds them
/// into its event loop. Implementations take `&self` so that a single
/// service can be shared by every part of a protocol instance.
pub trait TimerService<K> {
    /// Arms (or re-arms) the timer identified by `key`.
    fn schedule(&self, key: K, timeout: Duration);

    /// Disarms the timer identified by `key`, if armed.
    fn cancel(&self, key: &K);
}

/// Deterministic timer service driven by an explicit clock.
///
/// Nothing fires on its own: the caller pulls expired keys with
/// [`ManualTimers::fire_next`], which also moves the clock forward.
#[derive(Debug)]
pub struct ManualTimers<K> {
    inner: RefCell<ManualTimersInner<K>>,
}

#[derive(Debug)]
struct ManualTimersInner<K> {
    now: Duration,
    next_seq: u64,
    deadlines: BTreeMap<K, (Duration, u64)>,
}

/// Timer service backed by tokio [`TimeoutTask`]s.
///
/// Expirations are sent over an unbounded channel as [`TimerFired`]
/// messages, which must be validated with [`TokioTimers::take_fired`] before
/// being processed.
#[derive(Debug)]
pub struct TokioTimers<K> {
    fired_tx: UnboundedSender<TimerFired<K>>,
    tasks: RefCell<BTreeMap<K, (u64, TimeoutTask)>>,
    next_gen: RefCell<u64>,
}

#[derive(Clone, Debug, new)]
pub struct TimerFired<K> {
    pub key: K,
    pub generation: u64,
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    /// Detach the task, meaning it will no longer be canceled if its handle is
    /// dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a new task that will call the provided async closure when the
    /// specified timeout expires.
    ///
    /// Returns a handler that can be used to manipulate the timeout task.
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let next = Instant::now() + timeout;
        let next = Arc::new(Mutex::new(next));
        let next_child = next.clone();

        let task = Task::spawn(
            async move {
                let timeout_fut = tokio::time::sleep(timeout);
                tokio::pin!(timeout_fut);

                loop {
                    tokio::select! {
                        // Timeout has expired.
                        _ = &mut timeout_fut => {
                            (cb)().await;
                            break;
                        }
                        message = control_rx.recv() => {
                            match message {
                                // Timeout has been refreshed/updated.
                                Some(Message::Reset(new_timeout)) => {
                                    let timeout = new_timeout.unwrap_or(timeout);
                                    let next = Instant::now() + timeout;
                                    timeout_fut.as_mut().reset(next);
                                    if let Ok(mut guard) = next_child.lock() {
                                        *guard = next;
                                    }
                                },
                                // Timeout has been aborted.
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            _task: task,
            control: control_tx,
            next,
        }
    }

    /// Resets the timeout, regardless if it has already expired or not.
    ///
    /// If a new timeout value isn't specified, the last value will be reused.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        if self.control.send(Message::Reset(timeout)).is_err() {
            error!("failed to reset timeout");
        }
    }

    /// Returns the remaining time before the timeout expires.
    pub fn remaining(&self) -> Duration {
        match self.next.lock() {
            Ok(next) => next.saturating_duration_since(Instant::now()),
            Err(_) => Duration::ZERO,
        }
    }
}

// ===== impl ManualTimers =====

impl<K> ManualTimers<K>
where
    K: Clone + Ord,
{
    pub fn new() -> Self {
        ManualTimers {
            inner: RefCell::new(ManualTimersInner {
                now: Duration::ZERO,
                next_seq: 0,
                deadlines: Default::default(),
            }),
        }
    }

    /// Current value of the clock.
    pub fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    /// Deadline of the earliest armed timer.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.inner
            .borrow()
            .deadlines
            .values()
            .map(|(deadline, _)| *deadline)
            .min()
    }

    /// Returns whether the given timer is armed.
    pub fn is_scheduled(&self, key: &K) -> bool {
        self.inner.borrow().deadlines.contains_key(key)
    }

    /// Returns the number of armed timers.
    pub fn len(&self) -> usize {
        self.inner.borrow().deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pops the earliest timer expiring no later than `until`, moving the
    /// clock to its deadline.
    ///
    /// Timers sharing a deadline fire in the order they were armed.
    pub fn fire_next(&self, until: Duration) -> Option<K> {
        let mut inner = self.inner.borrow_mut();
        let key = inner
            .deadlines
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= until)
            .min_by_key(|(_, (deadline, seq))| (*deadline, *seq))
            .map(|(key, _)| key.clone())?;
        if let Some((deadline, _)) = inner.deadlines.remove(&key) {
            inner.now = inner.now.max(deadline);
        }
        Some(key)
    }

    /// Moves the clock forward without firing anything.
    pub fn advance_to(&self, now: Duration) {
        let mut inner = self.inner.borrow_mut();
        inner.now = inner.now.max(now);
    }
}

impl<K> Default for ManualTimers<K>
where
    K: Clone + Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TimerService<K> for ManualTimers<K>
where
    K: Clone + Ord,
{
    fn schedule(&self, key: K, timeout: Duration) {
        let mut inner = self.inner.borrow_mut();
        let deadline = inner.now + timeout;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.deadlines.insert(key, (deadline, seq));
    }

    fn cancel(&self, key: &K) {
        self.inner.borrow_mut().deadlines.remove(key);
    }
}

impl<K, T> TimerService<K> for Rc<T>
where
    T: TimerService<K> + ?Sized,
{
    fn schedule(&self, key: K, timeout: Duration) {
        (**self).schedule(key, timeout)
    }

    fn cancel(&self, key: &K) {
        (**self).cancel(key)
    }
}

// ===== impl TokioTimers =====

impl<K> TokioTimers<K>
where
    K: Clone + Ord + Send + 'static,
{
    pub fn new(fired_tx: UnboundedSender<TimerFired<K>>) -> Self {
        TokioTimers {
            fired_tx,
            tasks: Default::default(),
            next_gen: RefCell::new(0),
        }
    }

    /// Checks that an expiration still refers to the currently armed timer.
    ///
    /// An expiration that raced with a cancellation or a reschedule is
    /// discarded.
    pub fn take_fired(&self, fired: TimerFired<K>) -> Option<K> {
        let mut tasks = self.tasks.borrow_mut();
        match tasks.get(&fired.key) {
            Some((generation, _)) if *generation == fired.generation => {
                tasks.remove(&fired.key);
                Some(fired.key)
            }
            _ => None,
        }
    }
}

impl<K> TimerService<K> for TokioTimers<K>
where
    K: Clone + Ord + Send + 'static,
{
    fn schedule(&self, key: K, timeout: Duration) {
        let generation = {
            let mut next_gen = self.next_gen.borrow_mut();
            *next_gen += 1;
            *next_gen
        };
        let fired_tx = self.fired_tx.clone();
        let fired = TimerFired::new(key.clone(), generation);
        let task = TimeoutTask::new(timeout, move || async move {
            let _ = fired_tx.send(fired);
        });
        self.tasks.borrow_mut().insert(key, (generation, task));
    }

    fn cancel(&self, key: &K) {
        self.tasks.borrow_mut().remove(key);
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_timers_order() {
        let timers = ManualTimers::new();
        timers.schedule("b", Duration::from_secs(2));
        timers.schedule("a", Duration::from_secs(2));
        timers.schedule("c", Duration::from_secs(1));
        assert_eq!(timers.next_deadline(), Some(Duration::from_secs(1)));

        let until = Duration::from_secs(10);
        assert_eq!(timers.fire_next(until), Some("c"));
        assert_eq!(timers.fire_next(until), Some("b"));
        assert_eq!(timers.fire_next(until), Some("a"));
        assert_eq!(timers.fire_next(until), None);
        assert_eq!(timers.now(), Duration::from_secs(2));
    }

    #[test]
    fn manual_timers_reschedule_and_cancel() {
        let timers = ManualTimers::new();
        timers.schedule(1, Duration::from_secs(5));
        timers.schedule(1, Duration::from_secs(1));
        timers.schedule(2, Duration::from_secs(1));
        timers.cancel(&2);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.fire_next(Duration::from_millis(500)), None);
        assert_eq!(timers.fire_next(Duration::from_secs(1)), Some(1));
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timers_discard_stale() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = TokioTimers::new(tx);
        timers.schedule(7u32, Duration::from_secs(1));
        let stale = rx.recv().await.unwrap();

        // Rearmed after expiring: the old expiration must be ignored.
        timers.schedule(7u32, Duration::from_secs(1));
        assert_eq!(timers.take_fired(stale), None);
        let fired = rx.recv().await.unwrap();
        assert_eq!(timers.take_fired(fired), Some(7));
    }
}
