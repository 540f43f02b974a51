//! # Pre-flight Gate
//!
//! Serializes an asynchronous "pre-flight" action (log in, fetch an
//! encryption key, ...) so that it never runs twice at the same time.
//!
//! Callers that arrive while the action is in flight do not start it again:
//! they queue behind it and are all released together, in arrival order,
//! with the action's own outcome. Once released the gate is idle and the next
//! caller starts a fresh invocation.
//!
//! The action is driven on its own Tokio task. Dropping an `acquire` future
//! therefore never strands the other waiters.

use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::error::GateError;

/// Boxed future returned by a pre-flight action.
pub type PreflightFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A shareable pre-flight action.
pub type PreflightAction = Arc<dyn Fn() -> PreflightFuture + Send + Sync>;

/// Wraps an async closure into a [`PreflightAction`].
///
/// # Example
/// ```rust
/// use lib_request::core::gate::{preflight, Gate};
///
/// let gate = Gate::new(preflight(|| async {
///     // perform the login handshake here
///     anyhow::Ok(())
/// }));
/// assert!(!gate.is_busy());
/// ```
pub fn preflight<F, Fut>(action: F) -> PreflightAction
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || action().boxed())
}

/// Called once, under the gate's lock, with the outcome of the invocation.
type Waiter = Box<dyn FnOnce(Result<(), GateError>) + Send>;

#[derive(Default)]
struct GateState {
    busy: bool,
    waiters: Vec<Waiter>,
}

/// # Gate
///
/// Shares one in-flight execution of a pre-flight action among all
/// concurrent callers.
pub struct Gate {
    action: Option<PreflightAction>,
    state: Arc<Mutex<GateState>>,
}

impl Gate {
    /// Creates a gate around `action`.
    pub fn new(action: PreflightAction) -> Self {
        Self {
            action: Some(action),
            state: Arc::new(Mutex::new(GateState::default())),
        }
    }

    /// A gate with no action; `acquire` succeeds immediately.
    pub fn open() -> Self {
        Self {
            action: None,
            state: Arc::new(Mutex::new(GateState::default())),
        }
    }

    /// True while the pre-flight action is executing.
    pub fn is_busy(&self) -> bool {
        self.state.lock().expect("Gate lock poisoned").busy
    }

    /// Number of callers waiting on the current invocation.
    pub fn waiting(&self) -> usize {
        self.state.lock().expect("Gate lock poisoned").waiters.len()
    }

    /// Waits for the caller's turn through the pre-flight action.
    ///
    /// Starts the action if the gate is idle, otherwise joins the batch that
    /// the running invocation will release.
    ///
    /// # Errors
    /// Returns the action's failure, shared by every caller of the batch.
    pub async fn acquire(&self) -> Result<(), GateError> {
        self.acquire_with(|outcome| outcome)
            .await
            .unwrap_or_else(|| Err(GateError::closed()))
    }

    /// Like [`Gate::acquire`], but runs `on_settle` at the moment the
    /// invocation settles, before the gate turns idle, and returns its value.
    ///
    /// Waiters are settled oldest first. `on_settle` runs while the gate is
    /// locked and must not call back into the gate. Returns `None` if the
    /// action's task went away without settling.
    pub async fn acquire_with<T, F>(&self, on_settle: F) -> Option<T>
    where
        F: FnOnce(Result<(), GateError>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let Some(action) = &self.action else {
            return Some(on_settle(Ok(())));
        };

        let (tx, rx) = oneshot::channel();
        let waiter: Waiter = Box::new(move |outcome| {
            // The caller may have stopped listening.
            let _ = tx.send(on_settle(outcome));
        });

        let starts_action = {
            let mut state = self.state.lock().expect("Gate lock poisoned");
            state.waiters.push(waiter);
            if state.busy {
                debug!(waiters = state.waiters.len(), "pre-flight in flight, queued behind it");
                false
            } else {
                state.busy = true;
                true
            }
        };

        if starts_action {
            debug!("starting pre-flight action");
            let action = Arc::clone(action);
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                // A panicking action, even one that panics before handing back
                // its future, must still release its waiters.
                let outcome = match tokio::spawn(async move { action().await }).await {
                    Ok(result) => result.map_err(GateError::new),
                    Err(join_err) => Err(GateError::new(anyhow::anyhow!(
                        "pre-flight action aborted: {join_err}"
                    ))),
                };
                Gate::release(&state, outcome);
            });
        }

        rx.await.ok()
    }

    /// Settles every queued waiter with `outcome`, oldest first, then marks
    /// the gate idle.
    fn release(state: &Mutex<GateState>, outcome: Result<(), GateError>) {
        let mut state = state.lock().expect("Gate lock poisoned");
        let waiters = std::mem::take(&mut state.waiters);
        match &outcome {
            Ok(()) => debug!(waiters = waiters.len(), "pre-flight action succeeded"),
            Err(err) => warn!(waiters = waiters.len(), error = %err, "pre-flight action failed"),
        }
        for waiter in waiters {
            waiter(outcome.clone());
        }
        state.busy = false;
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::open()
    }
}
