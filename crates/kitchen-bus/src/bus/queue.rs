//! FIFO of admitted commands that have not been written to the worker yet.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::BusResult;
use crate::bridge::protocol::Command;

/// A command plus the channel its caller is waiting on.
///
/// Consuming `resolve` is the only way to answer, so a request is answered
/// at most once.
pub(crate) struct PendingRequest {
    pub seq: u64,
    pub command: Command,
    pub admitted_at: Instant,
    reply: oneshot::Sender<BusResult>,
}

impl PendingRequest {
    fn expires_at(&self, since: Instant, max_wait: Duration) -> Instant {
        self.admitted_at.max(since) + max_wait
    }

    pub fn resolve(self, result: BusResult) {
        if self.reply.send(result).is_err() {
            tracing::debug!(seq = self.seq, "Caller dropped before its command resolved");
        }
    }
}

#[derive(Default)]
pub(crate) struct CommandQueue {
    pending: VecDeque<PendingRequest>,
    next_seq: u64,
}

impl CommandQueue {
    pub fn admit(
        &mut self,
        command: Command,
        reply: oneshot::Sender<BusResult>,
        now: Instant,
    ) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.pending.push_back(PendingRequest {
            seq,
            command,
            admitted_at: now,
            reply,
        });
        seq
    }

    pub fn pop(&mut self) -> Option<PendingRequest> {
        self.pending.pop_front()
    }

    /// Put back a request that never reached the worker.
    pub fn restore(&mut self, request: PendingRequest) {
        self.pending.push_front(request);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Deadline of the oldest request. Waiting only counts from `since`, the
    /// moment the worker stopped being available.
    pub fn oldest_deadline(&self, since: Instant, max_wait: Duration) -> Option<Instant> {
        self.pending.front().map(|r| r.expires_at(since, max_wait))
    }

    /// Remove every request that has waited `max_wait` without a worker.
    pub fn take_expired(
        &mut self,
        now: Instant,
        since: Instant,
        max_wait: Duration,
    ) -> Vec<PendingRequest> {
        let mut expired = Vec::new();
        while self
            .pending
            .front()
            .is_some_and(|r| r.expires_at(since, max_wait) <= now)
        {
            expired.extend(self.pending.pop_front());
        }
        expired
    }

    pub fn drain(&mut self) -> impl Iterator<Item = PendingRequest> + '_ {
        self.pending.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admit(queue: &mut CommandQueue, line: &str, at: Instant) -> oneshot::Receiver<BusResult> {
        let (tx, rx) = oneshot::channel();
        queue.admit(Command::raw(line).unwrap(), tx, at);
        rx
    }

    #[test]
    fn fifo_with_increasing_sequence() {
        let now = Instant::now();
        let mut queue = CommandQueue::default();
        let _a = admit(&mut queue, "GET_ALL", now);
        let _b = admit(&mut queue, "PROCESSAR_PEDIDO", now);

        let first = queue.pop().unwrap();
        let second = queue.pop().unwrap();
        assert_eq!(first.command.as_str(), "GET_ALL");
        assert_eq!(second.command.as_str(), "PROCESSAR_PEDIDO");
        assert!(first.seq < second.seq);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn restore_puts_request_back_at_head() {
        let now = Instant::now();
        let mut queue = CommandQueue::default();
        let _a = admit(&mut queue, "A", now);
        let _b = admit(&mut queue, "B", now);

        let head = queue.pop().unwrap();
        queue.restore(head);
        assert_eq!(queue.pop().unwrap().command.as_str(), "A");
    }

    #[test]
    fn expiry_only_takes_old_requests() {
        let start = Instant::now();
        let wait = Duration::from_secs(30);
        let mut queue = CommandQueue::default();
        let _a = admit(&mut queue, "A", start);
        let _b = admit(&mut queue, "B", start + Duration::from_secs(10));

        assert_eq!(queue.oldest_deadline(start, wait), Some(start + wait));
        assert!(
            queue
                .take_expired(start + Duration::from_secs(29), start, wait)
                .is_empty()
        );

        let expired = queue.take_expired(start + wait, start, wait);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].command.as_str(), "A");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn expiry_counts_only_time_without_a_worker() {
        let start = Instant::now();
        let wait = Duration::from_secs(30);
        let mut queue = CommandQueue::default();
        let _a = admit(&mut queue, "A", start);

        // Admitted long ago, but the worker only went away at `lost`.
        let lost = start + Duration::from_secs(45);
        assert_eq!(queue.oldest_deadline(lost, wait), Some(lost + wait));
        assert!(
            queue
                .take_expired(lost + Duration::from_secs(1), lost, wait)
                .is_empty()
        );
        assert_eq!(queue.take_expired(lost + wait, lost, wait).len(), 1);
    }

    #[tokio::test]
    async fn resolve_reaches_caller_once() {
        let mut queue = CommandQueue::default();
        let rx = admit(&mut queue, "GET_ALL", Instant::now());

        queue
            .pop()
            .unwrap()
            .resolve(Ok(serde_json::json!({"ok": true})));
        assert_eq!(rx.await.unwrap(), Ok(serde_json::json!({"ok": true})));
    }

    #[test]
    fn resolve_after_caller_dropped_is_harmless() {
        let mut queue = CommandQueue::default();
        drop(admit(&mut queue, "GET_ALL", Instant::now()));
        queue.pop().unwrap().resolve(Ok(serde_json::Value::Null));
    }
}
