//! # Gated, Queued, Retrying Request Dispatcher
//!
//! The `Dispatcher` sits between application code and a [`Transport`]. Every
//! request it accepts goes through three stages:
//!
//! 1.  **Queueing**: `submit` tags the request with a fresh [`RequestId`],
//!     records it in the [`RetryLedger`] and appends it to a FIFO queue. It
//!     never fails synchronously; outcomes are delivered through callbacks
//!     and the returned [`RequestHandle`].
//!
//! 2.  **Gating**: a single background drain task per dispatcher awaits the
//!     pre-flight [`Gate`] and then runs, one at a time, every task that was
//!     queued when the gate settled. Anything queued later (new submissions
//!     and retries alike) forms the next round and passes through a fresh
//!     gate invocation. If the gate fails, that whole batch fails without
//!     touching the transport and without consuming a retry.
//!
//! 3.  **Retrying**: a failed attempt (transport error or a response the
//!     validator refused) is re-queued at the back with the same identity
//!     and parameters while the ledger allows it. Once retries run out the
//!     last error is delivered.
//!
//! Requests submitted with `skip_gate` bypass both the gate and the queue and
//! run immediately on their own task. This is how a pre-flight action can use
//! the dispatcher for its own calls without waiting on itself.
//!
//! A panic in the transport or validator counts as a failed attempt. A panic
//! in a callback or hook is logged and swallowed; the request's outcome is
//! still delivered to its handle.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::error::{DispatchError, GateError, TransportError};
use super::gate::{preflight, Gate, PreflightAction};
use super::ledger::RetryLedger;
use super::request::{RequestDescriptor, RequestId, RequestParams, Response};
use super::transport::Transport;

/// Hook fired for every request that completes successfully.
pub type SuccessHook = Arc<dyn Fn(&Response, &RequestDescriptor) + Send + Sync>;
/// Hook fired for every request that fails terminally.
pub type ErrorHook = Arc<dyn Fn(&DispatchError, &RequestDescriptor) + Send + Sync>;
/// Decides whether a transport response counts as a success.
pub type ResponseValidator = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

type SuccessCallback = Box<dyn FnOnce(&Response, &RequestDescriptor) + Send>;
type ErrorCallback = Box<dyn FnOnce(&DispatchError, &RequestDescriptor) + Send>;
type Outcome = Result<Response, DispatchError>;

/// How many times a failed request is re-submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Master switch; when off, the first failure is terminal.
    pub enabled: bool,
    /// Re-submissions allowed after the first attempt.
    pub max_retry: u32,
}

impl RetryPolicy {
    /// Retries switched off.
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            max_retry: 1,
        }
    }

    /// Retries switched on, at most `max_retry` of them.
    pub const fn up_to(max_retry: u32) -> Self {
        Self {
            enabled: true,
            max_retry,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Per-request options for [`Dispatcher::submit`].
#[derive(Default)]
pub struct SubmitOptions {
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    skip_gate: bool,
}

impl SubmitOptions {
    /// No callbacks, gated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once with the final response if the request succeeds.
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Response, &RequestDescriptor) + Send + 'static,
    {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Called once with the final error if the request fails.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&DispatchError, &RequestDescriptor) + Send + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Runs the request immediately, without waiting for the pre-flight gate.
    pub fn skip_gate(mut self) -> Self {
        self.skip_gate = true;
        self
    }
}

/// Resolves to the terminal outcome of one submitted request.
///
/// Dropping the handle does not cancel the request.
#[derive(Debug)]
pub struct RequestHandle {
    id: RequestId,
    rx: oneshot::Receiver<Outcome>,
}

impl RequestHandle {
    /// Identity assigned to the request.
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for RequestHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(DispatchError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Task {
    descriptor: RequestDescriptor,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    reply: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct DispatchState {
    queue: VecDeque<Task>,
    ledger: RetryLedger,
    last_id: u64,
    draining: bool,
}

struct Shared {
    transport: Arc<dyn Transport>,
    gate: Gate,
    policy: RetryPolicy,
    validator: Option<ResponseValidator>,
    on_success: Option<SuccessHook>,
    on_error: Option<ErrorHook>,
    state: Mutex<DispatchState>,
}

/// # Dispatcher
///
/// Cheap to clone; clones share the same queue, ledger and gate. Separate
/// dispatchers built from separate builders share nothing.
///
/// `submit` spawns onto the ambient Tokio runtime and must be called from
/// within one.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Starts configuring a dispatcher around `transport`.
    pub fn builder<T: Transport + 'static>(transport: T) -> DispatcherBuilder {
        DispatcherBuilder::new(transport)
    }

    /// Queues `params` for execution and returns a handle to its outcome.
    ///
    /// Exactly one of the success or error callbacks fires, exactly once,
    /// when the request reaches a terminal state.
    pub fn submit(&self, params: RequestParams, options: SubmitOptions) -> RequestHandle {
        let (reply, rx) = oneshot::channel();
        let SubmitOptions {
            on_success,
            on_error,
            skip_gate,
        } = options;

        let mut state = self.shared.lock();
        state.last_id += 1;
        let id = RequestId::new(state.last_id);
        state.ledger.register(id, params.clone());
        debug!(
            request_id = id.get(),
            method = %params.method,
            url = %params.url,
            skip_gate,
            "request submitted"
        );

        let task = Task {
            descriptor: RequestDescriptor::first_attempt(id, params),
            on_success,
            on_error,
            reply,
        };

        if skip_gate {
            drop(state);
            tokio::spawn(Arc::clone(&self.shared).run_ungated(task));
        } else {
            let start = Shared::push_task(&mut state, task);
            drop(state);
            if start {
                tokio::spawn(Arc::clone(&self.shared).drain());
            }
        }

        RequestHandle { id, rx }
    }

    /// Queues `params` with default options.
    pub fn send(&self, params: RequestParams) -> RequestHandle {
        self.submit(params, SubmitOptions::default())
    }

    /// Sends `params` straight to the transport: no gate, no queue, no
    /// validation, no retries.
    ///
    /// The descriptor handed to the transport carries identity `0`, which
    /// queued requests never use.
    pub async fn execute_direct(&self, params: RequestParams) -> Result<Response, TransportError> {
        let descriptor = RequestDescriptor::first_attempt(RequestId::new(0), params);
        self.shared.transport.execute(&descriptor).await
    }

    /// The shared transport.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.shared.transport)
    }

    /// The retry policy in force.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.shared.policy
    }

    /// Tasks waiting in the queue, excluding the one in flight.
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Identities with an outstanding task.
    pub fn tracked(&self) -> usize {
        self.shared.lock().ledger.len()
    }

    /// True if `id` still has a queued or in-flight task.
    pub fn is_tracked(&self, id: RequestId) -> bool {
        self.shared.lock().ledger.contains(id)
    }

    /// True while the drain task is running.
    pub fn is_draining(&self) -> bool {
        self.shared.lock().draining
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().expect("Dispatcher lock poisoned")
    }

    /// Appends `task` and claims the drain role if nobody holds it.
    /// Returns true when the caller must spawn the drain task.
    fn push_task(state: &mut DispatchState, task: Task) -> bool {
        state.queue.push_back(task);
        if state.draining {
            false
        } else {
            state.draining = true;
            true
        }
    }

    async fn drain(self: Arc<Self>) {
        let mut guard = DrainGuard {
            shared: Arc::clone(&self),
            armed: true,
        };

        loop {
            {
                let mut state = self.lock();
                if state.queue.is_empty() {
                    state.draining = false;
                    guard.armed = false;
                    debug!("queue drained");
                    return;
                }
            }

            // The batch is whatever is queued when the gate settles.
            let shared = Arc::clone(&self);
            let settled = self
                .gate
                .acquire_with(move |outcome| (outcome, shared.lock().queue.len()))
                .await;
            let (gate, batch) = match settled {
                Some(settled) => settled,
                None => (Err(GateError::closed()), self.lock().queue.len()),
            };

            match gate {
                Ok(()) => {
                    debug!(batch, "gate open, running batch");
                    for _ in 0..batch {
                        let next = self.lock().queue.pop_front();
                        let Some(task) = next else { break };
                        self.run_queued(task).await;
                    }
                }
                Err(err) => {
                    let failed: Vec<Task> = {
                        let mut state = self.lock();
                        let failed: Vec<Task> = state.queue.drain(..batch).collect();
                        for task in &failed {
                            state.ledger.discard(task.descriptor.id);
                        }
                        failed
                    };
                    warn!(batch = failed.len(), error = %err, "gate failed, failing batch");
                    for task in failed {
                        self.finish(task, Err(DispatchError::Gate(err.clone())));
                    }
                }
            }
        }
    }

    async fn run_queued(&self, task: Task) {
        match self.attempt(&task.descriptor).await {
            Ok(response) => self.succeed(task, response),
            Err(err) => {
                if let Some(retry) = self.after_failure(task, err) {
                    let mut state = self.lock();
                    // The drain task is the caller, so the role is already held.
                    Shared::push_task(&mut state, retry);
                }
            }
        }
    }

    async fn run_ungated(self: Arc<Self>, mut task: Task) {
        loop {
            match self.attempt(&task.descriptor).await {
                Ok(response) => return self.succeed(task, response),
                Err(err) => match self.after_failure(task, err) {
                    Some(retry) => task = retry,
                    None => return,
                },
            }
        }
    }

    async fn attempt(&self, descriptor: &RequestDescriptor) -> Result<Response, TransportError> {
        debug!(
            request_id = descriptor.id.get(),
            attempt = descriptor.attempt(),
            "executing request"
        );
        let call = async {
            let response = self.transport.execute(descriptor).await?;
            match &self.validator {
                Some(valid) if !valid(&response) => Err(TransportError::rejected(response)),
                _ => Ok(response),
            }
        };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(request_id = descriptor.id.get(), panic = %message, "transport panicked");
                Err(TransportError::Other(anyhow::anyhow!(
                    "transport panicked: {message}"
                )))
            }
        }
    }

    fn succeed(&self, task: Task, response: Response) {
        self.lock().ledger.discard(task.descriptor.id);
        debug!(
            request_id = task.descriptor.id.get(),
            status = response.status,
            attempt = task.descriptor.attempt(),
            "request succeeded"
        );
        self.finish(task, Ok(response));
    }

    /// Either turns `task` into its next attempt or delivers `err` as final.
    fn after_failure(&self, mut task: Task, err: TransportError) -> Option<Task> {
        let id = task.descriptor.id;
        let next = {
            let mut state = self.lock();
            if self.policy.enabled && state.ledger.should_retry(id, self.policy.max_retry) {
                Some(state.ledger.bump(id))
            } else {
                state.ledger.discard(id);
                None
            }
        };

        match next {
            Some(Ok(descriptor)) => {
                info!(
                    request_id = id.get(),
                    retry_count = descriptor.retry_count,
                    max_retry = self.policy.max_retry,
                    error = %err,
                    "request failed, retrying"
                );
                task.descriptor = descriptor;
                Some(task)
            }
            Some(Err(ledger_err)) => {
                error!(request_id = id.get(), error = %ledger_err, "retry ledger out of sync");
                self.finish(task, Err(ledger_err.into()));
                None
            }
            None => {
                warn!(
                    request_id = id.get(),
                    attempts = task.descriptor.attempt(),
                    error = %err,
                    "request failed"
                );
                self.finish(task, Err(err.into()));
                None
            }
        }
    }

    fn finish(&self, task: Task, outcome: Outcome) {
        let Task {
            descriptor,
            on_success,
            on_error,
            reply,
        } = task;

        match &outcome {
            Ok(response) => {
                if let Some(callback) = on_success {
                    guarded("success callback", &descriptor, || callback(response, &descriptor));
                }
                if let Some(hook) = &self.on_success {
                    guarded("success hook", &descriptor, || hook(response, &descriptor));
                }
            }
            Err(err) => {
                if let Some(callback) = on_error {
                    guarded("error callback", &descriptor, || callback(err, &descriptor));
                }
                if let Some(hook) = &self.on_error {
                    guarded("error hook", &descriptor, || hook(err, &descriptor));
                }
            }
        }
        // Fire-and-forget callers drop their handle.
        let _ = reply.send(outcome);
    }
}

/// Hands the queue back if the drain task stops without emptying it.
///
/// Remaining tasks fail with [`DispatchError::Closed`] and the next `submit`
/// starts a fresh drain task.
struct DrainGuard {
    shared: Arc<Shared>,
    armed: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let abandoned: Vec<Task> = {
            let mut state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.draining = false;
            let abandoned: Vec<Task> = state.queue.drain(..).collect();
            for task in &abandoned {
                state.ledger.discard(task.descriptor.id);
            }
            abandoned
        };
        error!(abandoned = abandoned.len(), "drain task stopped unexpectedly");
        for task in abandoned {
            self.shared.finish(task, Err(DispatchError::Closed));
        }
    }
}

/// Runs a user callback, logging instead of unwinding if it panics.
fn guarded(what: &'static str, descriptor: &RequestDescriptor, callback: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        error!(
            request_id = descriptor.id.get(),
            panic = %panic_message(payload.as_ref()),
            "{} panicked",
            what
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Configures and builds a [`Dispatcher`].
pub struct DispatcherBuilder {
    transport: Arc<dyn Transport>,
    preflight: Option<PreflightAction>,
    policy: RetryPolicy,
    validator: Option<ResponseValidator>,
    on_success: Option<SuccessHook>,
    on_error: Option<ErrorHook>,
}

impl DispatcherBuilder {
    /// Starts from `transport` with no pre-flight action, retries off and
    /// every response considered valid.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::with_shared_transport(Arc::new(transport))
    }

    /// Like [`DispatcherBuilder::new`] for an already shared transport.
    pub fn with_shared_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            preflight: None,
            policy: RetryPolicy::default(),
            validator: None,
            on_success: None,
            on_error: None,
        }
    }

    /// Runs `action` before each batch of queued requests.
    pub fn preflight<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.preflight = Some(preflight(action));
        self
    }

    /// Uses an already wrapped pre-flight action.
    pub fn preflight_action(mut self, action: PreflightAction) -> Self {
        self.preflight = Some(action);
        self
    }

    /// Sets the retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Treats responses for which `validator` returns false as failures.
    pub fn validate_response<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Fires after every successful request, after its own callback.
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Response, &RequestDescriptor) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Fires after every failed request, after its own callback.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DispatchError, &RequestDescriptor) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Applies the retry settings of a loaded configuration. Unset fields
    /// keep their current value.
    #[cfg(feature = "configs")]
    pub fn with_config(mut self, config: &crate::configs::config_dispatch::DispatchConfig) -> Self {
        if let Some(enabled) = config.retry {
            self.policy.enabled = enabled;
        }
        if let Some(max_retry) = config.max_retry {
            self.policy.max_retry = max_retry;
        }
        self
    }

    /// Finishes configuration.
    pub fn build(self) -> Dispatcher {
        let gate = match self.preflight {
            Some(action) => Gate::new(action),
            None => Gate::open(),
        };
        Dispatcher {
            shared: Arc::new(Shared {
                transport: self.transport,
                gate,
                policy: self.policy,
                validator: self.validator,
                on_success: self.on_success,
                on_error: self.on_error,
                state: Mutex::new(DispatchState::default()),
            }),
        }
    }
}
