//! FIFO request queue and the dispatch loop.
//!
//! Every request that misses the cache lands in a single [`RequestQueue`].
//! One background task pops the head once a concurrency slot is free and the
//! controller's delay has elapsed since the previous call settled, then runs
//! the call in its own task. The call holds the slot until it settles, even
//! if every caller interested in it has already given up.
//!
//! Deduplicated requests register as extra waiters on the queued or
//! in-flight request with the same fingerprint instead of queueing a second
//! call.

use serde::de::DeserializeOwned;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio::time::{Duration, Instant};

use crate::client::ClientInner;
use crate::descriptor::{Fingerprint, RequestDescriptor};
use crate::response::{RawResponse, Response};
use crate::{Error, Result};

type Completion = oneshot::Sender<Result<RawResponse>>;

/// Stand-in for delays too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct Waiter {
    id: u64,
    tx: Completion,
}

/// A request owned by the scheduler until it is dispatched or cancelled.
pub(crate) struct QueuedRequest {
    pub(crate) id: u64,
    pub(crate) descriptor: RequestDescriptor,
    pub(crate) fingerprint: Fingerprint,
}

/// Handle parts produced by [`RequestQueue::enqueue`].
pub(crate) struct Enqueued {
    id: u64,
    leader: u64,
    receiver: oneshot::Receiver<Result<RawResponse>>,
}

#[derive(Default)]
pub(crate) struct RequestQueue {
    pending: VecDeque<QueuedRequest>,
    /// Completion handles keyed by the id of the request that will serve them.
    waiters: HashMap<u64, Vec<Waiter>>,
    /// Deduplicating request currently queued or in flight per fingerprint.
    leaders: HashMap<Fingerprint, u64>,
    in_flight: usize,
    next_id: u64,
    last_dispatched: Option<Instant>,
    last_settled: Option<Instant>,
}

impl RequestQueue {
    pub(crate) fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Queues `descriptor`, or attaches to an outstanding request for the
    /// same fingerprint when `dedupe` is set.
    pub(crate) fn enqueue(
        &mut self,
        descriptor: RequestDescriptor,
        fingerprint: Fingerprint,
        dedupe: bool,
    ) -> Enqueued {
        let id = self.allocate_id();
        let (tx, receiver) = oneshot::channel();

        if dedupe {
            if let Some(&leader) = self.leaders.get(&fingerprint) {
                if let Some(waiters) = self.waiters.get_mut(&leader) {
                    waiters.push(Waiter { id, tx });
                    tracing::debug!(
                        id,
                        leader,
                        fingerprint = %fingerprint,
                        "Sharing outstanding request"
                    );
                    return Enqueued {
                        id,
                        leader,
                        receiver,
                    };
                }
            }
            self.leaders.insert(fingerprint.clone(), id);
        }

        self.waiters.insert(id, vec![Waiter { id, tx }]);
        self.pending.push_back(QueuedRequest {
            id,
            descriptor,
            fingerprint,
        });
        Enqueued {
            id,
            leader: id,
            receiver,
        }
    }

    /// Detaches waiter `id` from request `leader`.
    ///
    /// Returns `true` if the request was still queued. A queued request
    /// without waiters left is dropped; an in-flight one keeps running and
    /// its result is simply not delivered to `id`.
    pub(crate) fn cancel(&mut self, leader: u64, id: u64) -> bool {
        let Some(waiters) = self.waiters.get_mut(&leader) else {
            return false;
        };
        waiters.retain(|waiter| waiter.id != id);
        let orphaned = waiters.is_empty();

        let Some(position) = self.pending.iter().position(|request| request.id == leader) else {
            return false;
        };

        if orphaned {
            self.waiters.remove(&leader);
            if let Some(request) = self.pending.remove(position) {
                if self.leaders.get(&request.fingerprint) == Some(&leader) {
                    self.leaders.remove(&request.fingerprint);
                }
                tracing::debug!(id = leader, fingerprint = %request.fingerprint, "Cancelled queued request");
            }
        }
        true
    }

    /// Earliest instant the next dispatch may happen, `None` if right away.
    pub(crate) fn ready_at(&self, delay: Duration) -> Option<Instant> {
        let reference = match (self.last_dispatched, self.last_settled) {
            (Some(dispatched), Some(settled)) => dispatched.max(settled),
            (Some(at), None) | (None, Some(at)) => at,
            (None, None) => return None,
        };
        Some(
            reference
                .checked_add(delay)
                .unwrap_or_else(|| reference + FAR_FUTURE),
        )
    }

    /// Moves the head of the queue into the in-flight set.
    pub(crate) fn pop_next(&mut self) -> Option<QueuedRequest> {
        let request = self.pending.pop_front()?;
        self.in_flight += 1;
        self.last_dispatched = Some(Instant::now());
        Some(request)
    }

    /// Delivers `result` to every waiter of `request` and returns how many
    /// were still listening.
    pub(crate) fn settle(&mut self, request: &QueuedRequest, result: Result<RawResponse>) -> usize {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.last_settled = Some(Instant::now());
        if self.leaders.get(&request.fingerprint) == Some(&request.id) {
            self.leaders.remove(&request.fingerprint);
        }

        let waiters = self.waiters.remove(&request.id).unwrap_or_default();
        waiters
            .into_iter()
            .map(|waiter| waiter.tx.send(result.clone()).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }

    pub(crate) fn depth(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Pending result of a submitted request.
///
/// Dropping a ticket before it resolves cancels the request if it has not
/// been dispatched yet, which makes wrapping [`Ticket::wait`] in a timeout
/// safe.
pub struct Ticket {
    id: u64,
    leader: Option<u64>,
    receiver: oneshot::Receiver<Result<RawResponse>>,
    client: Option<Arc<ClientInner>>,
    submitted_at: Instant,
    finished: bool,
}

impl Ticket {
    pub(crate) fn queued(client: Arc<ClientInner>, enqueued: Enqueued) -> Self {
        Self {
            id: enqueued.id,
            leader: Some(enqueued.leader),
            receiver: enqueued.receiver,
            client: Some(client),
            submitted_at: Instant::now(),
            finished: false,
        }
    }

    pub(crate) fn resolved(id: u64, raw: RawResponse) -> Self {
        let (tx, receiver) = oneshot::channel();
        let _ = tx.send(Ok(raw));
        Self {
            id,
            leader: None,
            receiver,
            client: None,
            submitted_at: Instant::now(),
            finished: false,
        }
    }

    /// Identifier of this submission, unique per client.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the request from the queue if it has not been dispatched.
    ///
    /// Returns `true` if the request was still queued. Once dispatched a
    /// request runs to completion; cancelling only discards its result.
    pub fn cancel(mut self) -> bool {
        self.finished = true;
        match (&self.client, self.leader) {
            (Some(client), Some(leader)) => client.lock_state().queue.cancel(leader, self.id),
            _ => false,
        }
    }

    /// Waits for the request to settle and decodes the body as `T`.
    pub async fn wait<T>(mut self) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let outcome = (&mut self.receiver).await;
        self.finished = true;
        let raw = outcome.map_err(|_| Error::Cancelled)??;
        decode(raw, self.submitted_at.elapsed())
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let (Some(client), Some(leader)) = (&self.client, self.leader) {
            client.lock_state().queue.cancel(leader, self.id);
        }
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("id", &self.id)
            .field("leader", &self.leader)
            .finish_non_exhaustive()
    }
}

fn decode<T>(raw: RawResponse, latency: Duration) -> Result<Response<T>>
where
    T: DeserializeOwned,
{
    match serde_json::from_str::<T>(&raw.body) {
        Ok(data) => Ok(Response {
            data,
            raw_body: raw.body,
            status: raw.status,
            headers: raw.headers,
            latency,
            source: raw.source,
        }),
        Err(e) => {
            tracing::error!(
                error = %e,
                raw_response = %raw.body,
                "Failed to deserialize response"
            );
            Err(Error::DeserializationFailed {
                raw_response: raw.body,
                serde_error: e.to_string(),
                status: raw.status,
            })
        }
    }
}

/// Background dispatch loop. Exits once the client is gone.
pub(crate) async fn run_dispatcher(
    client: Weak<ClientInner>,
    notify: Arc<Notify>,
    slots: Arc<Semaphore>,
) {
    tracing::debug!("Dispatcher started");
    loop {
        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
            break;
        };
        let Some((inner, request)) = next_due(&client, &notify).await else {
            break;
        };
        tokio::spawn(inner.dispatch(request, permit));
    }
    tracing::debug!("Dispatcher stopped");
}

/// Waits until the queue has a head and the active delay has elapsed, then
/// pops it. The client is only held while the lock is.
async fn next_due(
    client: &Weak<ClientInner>,
    notify: &Notify,
) -> Option<(Arc<ClientInner>, QueuedRequest)> {
    loop {
        let inner = client.upgrade()?;
        let wake_at = {
            let mut state = inner.lock_state();
            if state.queue.is_empty() {
                None
            } else {
                let delay = state.controller.current_delay();
                match state.queue.ready_at(delay) {
                    Some(at) if at > Instant::now() => Some(at),
                    _ => {
                        if let Some(request) = state.queue.pop_next() {
                            state.stats.record_dispatch();
                            tracing::debug!(
                                id = request.id,
                                fingerprint = %request.fingerprint,
                                delay_ms = delay.as_millis() as u64,
                                queue_depth = state.queue.depth(),
                                "Dispatching request"
                            );
                            drop(state);
                            return Some((inner, request));
                        }
                        None
                    }
                }
            }
        };
        drop(inner);

        match wake_at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => notify.notified().await,
        }
    }
}
