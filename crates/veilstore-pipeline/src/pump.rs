//! The single-pump batching executor.
//!
//! Units of work accumulate in a pending queue; at most one pump task runs
//! at a time, guarded by a boolean flag under the queue mutex. Each round
//! the pump encodes up to [`BATCH_SIZE`] ready units into one backend call,
//! demultiplexes the results by correlation id, runs each unit's decode
//! callback and resolves its completion handle exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::{PipelineError, Result};
use crate::statement::{RowSet, Statement};

/// Maximum number of statements per backend round trip.
pub const BATCH_SIZE: usize = 1024;

const RETRY_BASE: Duration = Duration::from_millis(50);
const RETRY_CAP: Duration = Duration::from_secs(5);

/// Produces the unit's statement, or `None` while preconditions are unmet.
///
/// The correlation id the pump assigned is passed in so the statement can
/// embed it where a procedure needs it.
pub type EncodeFn = Box<dyn FnMut(u32) -> Option<Statement> + Send>;

/// Consumes the unit's row set. Runs at most once.
pub type DecodeFn = Box<dyn FnOnce(&RowSet) + Send>;

struct Unit {
    correlation: u32,
    encode: EncodeFn,
    decode: Option<DecodeFn>,
    done: oneshot::Sender<()>,
}

struct State {
    pending: VecDeque<Unit>,
    running: bool,
    next_correlation: u32,
}

struct Inner {
    backend: Arc<dyn Backend>,
    state: Mutex<State>,
}

/// Handle to the shared pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    /// Create a pipeline over the given backend.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                state: Mutex::new(State {
                    pending: VecDeque::new(),
                    running: false,
                    next_correlation: 0,
                }),
            }),
        }
    }

    /// Enqueue a unit and wait for it to resolve.
    ///
    /// Resolution means the unit's statement executed and any decode
    /// callback ran; it does not imply the decode populated anything.
    pub async fn submit(&self, encode: EncodeFn, decode: Option<DecodeFn>) -> Result<()> {
        let rx = {
            let mut state = self.inner.state.lock().unwrap();
            let correlation = state.next_correlation;
            state.next_correlation = state.next_correlation.wrapping_add(1);

            let (done, rx) = oneshot::channel();
            state.pending.push_back(Unit {
                correlation,
                encode,
                decode,
                done,
            });

            if !state.running {
                state.running = true;
                tokio::spawn(pump(Arc::clone(&self.inner)));
            }
            rx
        };

        rx.await.map_err(|_| PipelineError::Dropped)
    }

    /// Run one statement and hand back its row set.
    ///
    /// Convenience over [`Pipeline::submit`] for callers that want the rows
    /// inline rather than decoding into shared state.
    pub async fn fetch(&self, statement: Statement) -> Result<RowSet> {
        let slot = Arc::new(Mutex::new(RowSet::empty()));
        let sink = Arc::clone(&slot);
        let mut statement = Some(statement);

        self.submit(
            Box::new(move |_| statement.take()),
            Some(Box::new(move |rows| {
                *sink.lock().unwrap() = rows.clone();
            })),
        )
        .await?;

        let rows = std::mem::take(&mut *slot.lock().unwrap());
        Ok(rows)
    }
}

async fn pump(inner: Arc<Inner>) {
    let mut backoff = RETRY_BASE;

    loop {
        let units: Vec<Unit> = {
            let mut state = inner.state.lock().unwrap();
            if state.pending.is_empty() {
                state.running = false;
                return;
            }
            state.pending.drain(..).collect()
        };

        // Encode: ready units fill the batch, the rest wait for the next
        // round (their preconditions may be satisfied by this one).
        let mut ready = Vec::new();
        let mut statements = Vec::new();
        let mut deferred = VecDeque::new();
        for mut unit in units {
            if ready.len() >= BATCH_SIZE {
                deferred.push_back(unit);
                continue;
            }
            match (unit.encode)(unit.correlation) {
                Some(statement) => {
                    statements.push((unit.correlation, statement));
                    ready.push(unit);
                }
                None => deferred.push_back(unit),
            }
        }

        if ready.is_empty() {
            requeue(&inner, deferred);
            // Every pending unit is waiting on something outside this
            // pipeline round; yield rather than busy-spin.
            tokio::time::sleep(Duration::from_millis(1)).await;
            continue;
        }

        debug!(batch = statements.len(), deferred = deferred.len(), "executing round");

        let results = loop {
            match inner.backend.execute(&statements).await {
                Ok(results) => {
                    backoff = RETRY_BASE;
                    break Some(results);
                }
                Err(PipelineError::Unavailable(reason)) => {
                    warn!(%reason, delay_ms = backoff.as_millis() as u64, "backend unavailable, retrying round");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RETRY_CAP);
                }
                Err(error) => {
                    // Not retryable; the round's units resolve unpopulated.
                    warn!(%error, "batch rejected by backend");
                    break None;
                }
            }
        };

        let mut by_correlation: HashMap<u32, RowSet> = results
            .map(|rows| rows.into_iter().collect())
            .unwrap_or_default();

        for mut unit in ready {
            let rows = by_correlation
                .remove(&unit.correlation)
                .unwrap_or_default();
            if let Some(decode) = unit.decode.take() {
                decode(&rows);
            }
            // Receiver may have been dropped; resolution stays exactly-once
            // either way.
            let _ = unit.done.send(());
        }

        requeue(&inner, deferred);
    }
}

fn requeue(inner: &Inner, mut deferred: VecDeque<Unit>) {
    if deferred.is_empty() {
        return;
    }
    let mut state = inner.state.lock().unwrap();
    while let Some(unit) = deferred.pop_back() {
        state.pending.push_front(unit);
    }
}
