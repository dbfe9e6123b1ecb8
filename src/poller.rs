//! Long-lived blocking list poller.
//!
//! A [`ListPoller`] holds one exclusive connection and keeps reissuing
//! `BLPOP`/`BRPOP` on it, reporting every outcome as a [`PollEvent`] on a
//! channel until it is stopped or its [`PollPolicy`] says to suspend.
//!
//! ```text
//! Idle --start--> Awaiting --reply--> Awaiting   (reissued)
//!                          \-reply--> Idle       (suspended, connection released)
//!                          \-stop(instant)--> Idle (connection discarded)
//! ```

use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::commands::{blocking_pop, PopDirection};
use crate::connection::pool::BlockedConnection;
use crate::engine::Engine;
use crate::error::{RedustError, Result};
use crate::resp::types::RespValue;

/// When a poller suspends itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollPolicy(u8);

impl PollPolicy {
    /// Suspend after the first timeout.
    pub const UNTIL_TIMEOUT: Self = Self(1);
    /// Suspend after the first popped element.
    pub const UNTIL_FIRST_POP: Self = Self(2);
    /// Never suspend on its own.
    pub const FOREVER: Self = Self(4);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::FOREVER
    }
}

impl BitOr for PollPolicy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PollPolicy {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Outcome of one blocking pop.
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// `value` was popped from `list`.
    Popped { list: Bytes, value: Bytes },
    /// The blocking timeout expired with nothing to pop.
    TimeoutReached,
    /// The pop failed; the poller is idle afterwards.
    Failed(RedustError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Awaiting,
}

struct Control {
    state: PollState,
    suspended: bool,
    /// Signal of the running loop; notified to stop it instantly.
    stop_signal: Option<Arc<Notify>>,
    /// Bumped by every instant stop.
    generation: u64,
    keys: Vec<Bytes>,
    direction: PopDirection,
    timeout_secs: u64,
    policy: PollPolicy,
}

impl Control {
    fn is_current(&self, signal: &Arc<Notify>) -> bool {
        self.stop_signal
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, signal))
    }

    fn go_idle(&mut self, signal: &Arc<Notify>) {
        if self.is_current(signal) {
            self.state = PollState::Idle;
            self.stop_signal = None;
        }
    }
}

struct Shared {
    control: Mutex<Control>,
    events: mpsc::UnboundedSender<PollEvent>,
}

/// Repeatedly pops from a set of lists on an exclusive connection.
///
/// Dropping the poller stops it instantly.
pub struct ListPoller {
    engine: Engine,
    shared: Arc<Shared>,
}

impl ListPoller {
    /// Create an idle poller and the receiving end of its event channel.
    pub fn new<I>(
        engine: &Engine,
        keys: I,
        direction: PopDirection,
        timeout_secs: u64,
        policy: PollPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<PollEvent>)
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let (events, rx) = mpsc::unbounded_channel();
        let control = Control {
            state: PollState::Idle,
            suspended: false,
            stop_signal: None,
            generation: 0,
            keys: keys.into_iter().map(Into::into).collect(),
            direction,
            timeout_secs,
            policy,
        };
        let poller = Self {
            engine: engine.clone(),
            shared: Arc::new(Shared {
                control: Mutex::new(control),
                events,
            }),
        };
        (poller, rx)
    }

    /// Start polling. Clears a pending graceful stop; a no-op while the
    /// poller is already awaiting a reply.
    pub async fn start(&self) -> Result<()> {
        let generation = {
            let mut control = self.shared.control.lock();
            control.suspended = false;
            if control.state == PollState::Awaiting {
                return Ok(());
            }
            control.generation
        };

        let conn = self
            .engine
            .pool()
            .acquire_blocked()
            .await
            .map_err(|e| RedustError::no_connection("blocked", e))?;

        let signal = Arc::new(Notify::new());
        {
            let mut control = self.shared.control.lock();
            if control.generation != generation {
                // Stopped instantly while connecting.
                drop(control);
                tracing::debug!(conn = conn.id(), "list poller stopped before starting");
                conn.discard();
                return Ok(());
            }
            if control.state == PollState::Awaiting {
                // A concurrent start won the race.
                drop(control);
                conn.release();
                return Ok(());
            }
            control.state = PollState::Awaiting;
            control.stop_signal = Some(signal.clone());
        }
        tracing::debug!(conn = conn.id(), "list poller started");
        tokio::spawn(poll_loop(self.shared.clone(), conn, signal));
        Ok(())
    }

    /// Stop polling.
    ///
    /// Graceful: the in-flight pop completes and is reported, then the
    /// connection goes back to the pool. Instant: the connection and its
    /// in-flight reply are dropped right away.
    pub fn stop(&self, instant: bool) {
        let mut control = self.shared.control.lock();
        if instant {
            control.generation = control.generation.wrapping_add(1);
            if let Some(signal) = control.stop_signal.take() {
                // notify_one keeps a permit if the loop is between pops.
                signal.notify_one();
            }
            control.state = PollState::Idle;
        } else {
            control.suspended = true;
        }
    }

    pub fn state(&self) -> PollState {
        self.shared.control.lock().state
    }

    /// Awaiting replies and not about to suspend.
    pub fn is_running(&self) -> bool {
        let control = self.shared.control.lock();
        control.state == PollState::Awaiting && !control.suspended
    }

    pub fn keys(&self) -> Vec<Bytes> {
        self.shared.control.lock().keys.clone()
    }

    /// Takes effect with the next pop.
    pub fn set_keys<I>(&self, keys: I)
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        self.shared.control.lock().keys = keys.into_iter().map(Into::into).collect();
    }

    pub fn timeout(&self) -> u64 {
        self.shared.control.lock().timeout_secs
    }

    pub fn set_timeout(&self, timeout_secs: u64) {
        self.shared.control.lock().timeout_secs = timeout_secs;
    }

    pub fn policy(&self) -> PollPolicy {
        self.shared.control.lock().policy
    }

    pub fn set_policy(&self, policy: PollPolicy) {
        self.shared.control.lock().policy = policy;
    }

    pub fn direction(&self) -> PopDirection {
        self.shared.control.lock().direction
    }

    pub fn set_direction(&self, direction: PopDirection) {
        self.shared.control.lock().direction = direction;
    }
}

impl Drop for ListPoller {
    fn drop(&mut self) {
        self.stop(true);
    }
}

impl std::fmt::Debug for ListPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let control = self.shared.control.lock();
        f.debug_struct("ListPoller")
            .field("state", &control.state)
            .field("suspended", &control.suspended)
            .field("direction", &control.direction)
            .field("timeout_secs", &control.timeout_secs)
            .field("policy", &control.policy)
            .finish()
    }
}

async fn poll_loop(shared: Arc<Shared>, mut conn: BlockedConnection, signal: Arc<Notify>) {
    loop {
        let cmd = {
            let control = shared.control.lock();
            blocking_pop(control.direction, control.keys.clone(), control.timeout_secs)
        };

        let reply = tokio::select! {
            biased;
            _ = signal.notified() => None,
            reply = conn.execute(&cmd) => Some(reply),
        };
        let Some(reply) = reply else {
            tracing::debug!(conn = conn.id(), "list poller stopped instantly");
            conn.discard();
            return;
        };

        let mut control = shared.control.lock();
        if !control.is_current(&signal) {
            // Stopped instantly after the reply was read: drop it unreported.
            drop(control);
            tracing::debug!(conn = conn.id(), "list poller stopped instantly");
            conn.discard();
            return;
        }
        match reply.and_then(classify) {
            Ok(event) => {
                let suspend_on = match event {
                    PollEvent::TimeoutReached => PollPolicy::UNTIL_TIMEOUT,
                    _ => PollPolicy::UNTIL_FIRST_POP,
                };
                if control.policy.contains(suspend_on) {
                    control.suspended = true;
                }
                let _ = shared.events.send(event);
                if control.suspended {
                    control.go_idle(&signal);
                    drop(control);
                    tracing::debug!(conn = conn.id(), "list poller suspended");
                    conn.release();
                    return;
                }
            }
            Err(e) => {
                control.go_idle(&signal);
                drop(control);
                tracing::warn!(error = %e, "list poller failed");
                if e.poisons_connection() {
                    conn.discard();
                } else {
                    conn.release();
                }
                let _ = shared.events.send(PollEvent::Failed(e));
                return;
            }
        }
    }
}

/// A null element means the timeout expired, two elements are
/// `[list, value]`.
fn classify(value: RespValue) -> Result<PollEvent> {
    match value {
        RespValue::Bulk(None) => Ok(PollEvent::TimeoutReached),
        RespValue::Array(items) => match <[Option<Bytes>; 2]>::try_from(items) {
            Ok([Some(list), Some(value)]) => Ok(PollEvent::Popped { list, value }),
            Ok(_) => Err(RedustError::Protocol("null element in pop reply".into())),
            Err(items) if items.len() == 1 && items[0].is_none() => Ok(PollEvent::TimeoutReached),
            Err(items) => Err(RedustError::Protocol(format!(
                "pop reply has {} elements",
                items.len()
            ))),
        },
        RespValue::Error(msg) => Err(RedustError::redis(msg)),
        other => Err(RedustError::Protocol(format!(
            "unexpected {} reply to blocking pop",
            other.type_name()
        ))),
    }
}

// ── Tests ──────────────────────────────────────────────────────────
