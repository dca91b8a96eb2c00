//! Pending expectations and their timeout race
//!
//! A [`PendingExpectation`] is one caller waiting for one correlated reply.
//! It can be resolved by delivery, by a NAK, by a transport failure or by its
//! own deadline, and only the first of those is ever observed: the result slot
//! is consumed by its first write and later writes are discarded.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::poll_fn;
use tokio::sync::oneshot;
use tokio_util::time::{delay_queue, DelayQueue};

use crate::core::{Error, Result, MAX_TIMEOUT};
use super::matcher::{matches, MatchDetails, MatchRule};
use super::message::Datagram;

/// Successful reply to a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Whole datagram text, separators included
    pub payload: String,
    /// Capture groups when the reply was matched by pattern
    pub groups: Vec<Option<String>>,
}

impl Reply {
    /// Returns capture group `index`, if it took part in the match
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }
}

type Completion = Box<dyn FnOnce(Result<Reply>) + Send>;

/// Single-assignment result cell of one expectation
pub struct ResultSlot {
    completion: Option<Completion>,
}

impl ResultSlot {
    /// Writes the outcome. Returns `false`, and drops `outcome`, if the slot
    /// was already resolved.
    pub fn resolve(&mut self, outcome: Result<Reply>) -> bool {
        match self.completion.take() {
            Some(complete) => {
                complete(outcome);
                true
            }
            None => false,
        }
    }

    /// Whether a result has been written
    pub fn is_resolved(&self) -> bool {
        self.completion.is_none()
    }
}

impl fmt::Debug for ResultSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSlot")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Creates a result slot whose replies are passed through `transform` before
/// reaching the handle. A failing transform resolves the handle with
/// [`Error::Callback`].
pub fn channel<T, E, F>(transform: F) -> (ResultSlot, ExpectationHandle<T>)
where
    T: Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
    F: FnOnce(Reply) -> std::result::Result<T, E> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let complete = move |outcome: Result<Reply>| {
        let result = outcome.and_then(|reply| transform(reply).map_err(Error::callback));
        // The caller may have stopped waiting; nothing to do then.
        let _ = tx.send(result);
    };

    let slot = ResultSlot {
        completion: Some(Box::new(complete)),
    };
    (slot, ExpectationHandle { rx })
}

/// Creates a result slot that hands the raw [`Reply`] to the handle
pub fn reply_channel() -> (ResultSlot, ExpectationHandle<Reply>) {
    channel(|reply| Ok::<_, Infallible>(reply))
}

/// Caller side of an expectation; resolves once with the reply or a failure
#[derive(Debug)]
pub struct ExpectationHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> ExpectationHandle<T> {
    /// Returns the result if it is already available, without waiting
    pub fn try_result(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::EngineClosed)),
        }
    }
}

impl<T> Future for ExpectationHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::EngineClosed)))
    }
}

/// Checks that `timeout` can be scheduled, i.e. does not exceed [`MAX_TIMEOUT`]
pub fn validate_timeout(timeout: Duration) -> Result<()> {
    if timeout > MAX_TIMEOUT {
        return Err(timeout_too_long(timeout));
    }
    Ok(())
}

fn timeout_too_long(timeout: Duration) -> Error {
    Error::config(format!(
        "timeout {:?} exceeds the maximum of {:?}",
        timeout, MAX_TIMEOUT
    ))
}

/// Identifier of an expectation, unique within one queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpectationId(u64);

/// One in-flight correlation unit
pub struct PendingExpectation {
    id: ExpectationId,
    rule: MatchRule,
    timeout: Duration,
    timer: delay_queue::Key,
    slot: ResultSlot,
}

impl PendingExpectation {
    /// Queue-local identifier
    pub fn id(&self) -> ExpectationId {
        self.id
    }

    /// Rule the reply has to satisfy
    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }

    /// Deadline this expectation was registered with
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves the result slot; see [`ResultSlot::resolve`]
    pub fn resolve(&mut self, outcome: Result<Reply>) -> bool {
        self.slot.resolve(outcome)
    }
}

impl fmt::Debug for PendingExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingExpectation")
            .field("id", &self.id)
            .field("rule", &self.rule)
            .field("timeout", &self.timeout)
            .field("slot", &self.slot)
            .finish()
    }
}

/// Oldest-first queue of pending expectations with one timer each.
///
/// Taking an expectation out by any path also cancels its timer, so a timer
/// can only ever fire for an expectation that is still queued.
pub struct ExpectationQueue {
    pending: VecDeque<PendingExpectation>,
    timers: DelayQueue<ExpectationId>,
    next_id: u64,
}

impl ExpectationQueue {
    /// Creates an empty queue
    pub fn new() -> Self {
        ExpectationQueue {
            pending: VecDeque::new(),
            timers: DelayQueue::new(),
            next_id: 0,
        }
    }

    /// Appends an expectation and starts its countdown. Must be called from
    /// within a tokio runtime.
    ///
    /// A timeout above [`MAX_TIMEOUT`] is rejected with [`Error::Config`]; the
    /// slot is resolved with the same error and nothing is queued.
    pub fn push(
        &mut self,
        rule: MatchRule,
        timeout: Duration,
        mut slot: ResultSlot,
    ) -> Result<ExpectationId> {
        if timeout > MAX_TIMEOUT {
            slot.resolve(Err(timeout_too_long(timeout)));
            return Err(timeout_too_long(timeout));
        }

        let id = ExpectationId(self.next_id);
        self.next_id += 1;

        let timer = self.timers.insert(id, timeout);
        self.pending.push_back(PendingExpectation {
            id,
            rule,
            timeout,
            timer,
            slot,
        });
        Ok(id)
    }

    /// Number of queued expectations
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes the oldest expectation
    pub fn take_oldest(&mut self) -> Option<PendingExpectation> {
        self.remove_at(0)
    }

    /// Removes the first expectation, in registration order, whose rule
    /// accepts `datagram`
    pub fn take_first_match(
        &mut self,
        datagram: &Datagram,
    ) -> Option<(PendingExpectation, MatchDetails)> {
        let (index, details) = self
            .pending
            .iter()
            .enumerate()
            .find_map(|(index, expectation)| {
                matches(&expectation.rule, datagram).map(|details| (index, details))
            })?;
        let expectation = self.remove_at(index)?;
        Some((expectation, details))
    }

    /// Waits for the next expectation whose deadline passes and removes it.
    ///
    /// Pends forever while the queue is empty. Cancel safe: an expired
    /// expectation is only removed in the poll that returns it.
    pub async fn next_expired(&mut self) -> PendingExpectation {
        loop {
            match poll_fn(|cx| self.timers.poll_expired(cx)).await {
                Some(expired) => {
                    let id = expired.into_inner();
                    if let Some(index) = self.pending.iter().position(|p| p.id == id) {
                        if let Some(expectation) = self.pending.remove(index) {
                            return expectation;
                        }
                    }
                }
                None => futures::future::pending::<()>().await,
            }
        }
    }

    /// Removes every expectation and cancels all timers
    pub fn drain(&mut self) -> Vec<PendingExpectation> {
        self.timers.clear();
        self.pending.drain(..).collect()
    }

    fn remove_at(&mut self, index: usize) -> Option<PendingExpectation> {
        let expectation = self.pending.remove(index)?;
        self.timers.remove(&expectation.timer);
        Some(expectation)
    }
}

impl Default for ExpectationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExpectationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpectationQueue")
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, timeout};
    use tokio_test::{assert_pending, assert_ready, task};

    fn reply(payload: &str) -> Reply {
        Reply {
            payload: payload.to_string(),
            groups: vec![],
        }
    }

    #[test]
    fn test_slot_accepts_only_first_write() {
        let (mut slot, mut handle) = reply_channel();
        assert!(handle.try_result().is_none());

        assert!(slot.resolve(Ok(reply("1 0\r"))));
        assert!(!slot.resolve(Err(Error::Timeout(Duration::from_secs(5)))));
        assert!(slot.is_resolved());

        assert_eq!(handle.try_result().unwrap().unwrap(), reply("1 0\r"));
    }

    #[test]
    fn test_dropped_slot_closes_handle() {
        let (slot, handle) = reply_channel();
        let mut handle = task::spawn(handle);
        assert_pending!(handle.poll());

        drop(slot);
        assert!(handle.is_woken());
        assert!(matches!(assert_ready!(handle.poll()), Err(Error::EngineClosed)));
    }

    #[test]
    fn test_transform_failure_becomes_callback_error() {
        let (mut slot, mut handle) = channel(|reply: Reply| {
            reply.payload.trim_end().parse::<i32>()
        });
        slot.resolve(Ok(reply("not a number\r")));
        assert!(matches!(handle.try_result(), Some(Err(Error::Callback(_)))));

        let (mut slot, mut handle) = channel(|reply: Reply| {
            reply.payload.trim_end().parse::<i32>()
        });
        slot.resolve(Ok(reply("42\r")));
        assert_eq!(handle.try_result().unwrap().unwrap(), 42);
    }

    #[test]
    fn test_failure_skips_transform() {
        let (mut slot, mut handle) = channel(|_: Reply| -> std::result::Result<(), Error> {
            panic!("transform must not run on failure")
        });
        slot.resolve(Err(Error::nak("NAK\r")));
        assert!(matches!(handle.try_result(), Some(Err(Error::Nak { .. }))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_fire_in_deadline_order() {
        let mut queue = ExpectationQueue::new();
        let (slow, _h1) = reply_channel();
        let (fast, _h2) = reply_channel();
        let slow_id = queue
            .push(MatchRule::ExactLineCount(1), Duration::from_secs(5), slow)
            .unwrap();
        let fast_id = queue
            .push(MatchRule::ExactLineCount(1), Duration::from_secs(1), fast)
            .unwrap();

        assert_eq!(queue.next_expired().await.id(), fast_id);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_expired().await.id(), slow_id);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unschedulable_timeout_is_rejected() {
        let mut queue = ExpectationQueue::new();
        let (short, _h1) = reply_channel();
        let short_id = queue
            .push(MatchRule::ExactLineCount(1), Duration::from_secs(1), short)
            .unwrap();

        for timeout in [Duration::MAX, Duration::from_secs(3 * 365 * 24 * 60 * 60)] {
            let (slot, mut handle) = reply_channel();
            let pushed = queue.push(MatchRule::ExactLineCount(1), timeout, slot);
            assert!(matches!(pushed, Err(Error::Config(_))));
            assert!(matches!(handle.try_result(), Some(Err(Error::Config(_)))));
        }
        assert_eq!(queue.len(), 1);

        let (longest, _h2) = reply_channel();
        assert!(queue.push(MatchRule::ExactLineCount(1), MAX_TIMEOUT, longest).is_ok());
        assert!(validate_timeout(MAX_TIMEOUT).is_ok());
        assert!(validate_timeout(MAX_TIMEOUT + Duration::from_nanos(1)).is_err());

        assert_eq!(queue.next_expired().await.id(), short_id);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_taken_expectation_never_times_out() {
        let mut queue = ExpectationQueue::new();
        let (slot, _handle) = reply_channel();
        queue.push(MatchRule::ExactLineCount(1), Duration::from_secs(1), slot).unwrap();

        // Deadline has passed but the timer has not been polled yet.
        advance(Duration::from_secs(2)).await;
        let (taken, _) = queue
            .take_first_match(&Datagram::from_text("1 0\r"))
            .expect("reply matches");
        assert_eq!(taken.timeout(), Duration::from_secs(1));

        let expired = timeout(Duration::from_secs(10), queue.next_expired()).await;
        assert!(expired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_match_follows_registration_order() {
        let mut queue = ExpectationQueue::new();
        let (a, _ha) = reply_channel();
        let (b, _hb) = reply_channel();
        let (c, _hc) = reply_channel();
        queue.push(MatchRule::ExactLineCount(2), Duration::from_secs(5), a).unwrap();
        let b_id = queue
            .push(MatchRule::pattern("^OK").unwrap(), Duration::from_secs(5), b)
            .unwrap();
        queue.push(MatchRule::ExactLineCount(1), Duration::from_secs(5), c).unwrap();

        let (taken, details) = queue
            .take_first_match(&Datagram::from_text("OK\r"))
            .unwrap();
        assert_eq!(taken.id(), b_id);
        assert_eq!(details.groups, vec![Some("OK".to_string())]);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_cancels_timers() {
        let mut queue = ExpectationQueue::new();
        for _ in 0..3 {
            let (slot, _handle) = reply_channel();
            queue.push(MatchRule::ExactLineCount(1), Duration::from_millis(10), slot).unwrap();
        }

        assert_eq!(queue.drain().len(), 3);
        assert!(queue.is_empty());
        assert!(timeout(Duration::from_secs(1), queue.next_expired()).await.is_err());
    }
}
