use crate::{
    Shared,
    state::{
        State,
        StateWatcher,
    },
};
use anyhow::anyhow;
use futures::FutureExt;
use std::{
    any::Any,
    future::Future,
};
use tokio::sync::watch;
use tracing::Instrument;

/// Trait for service runners, providing a minimal interface for managing
/// the lifecycle of services such as start/stop and health status.
#[async_trait::async_trait]
pub trait Service {
    /// Send a start signal to the service without waiting for it to start.
    /// Returns an error if the service was already started.
    fn start(&self) -> anyhow::Result<()>;

    /// Send a start signal to the service and wait for it to start up.
    /// Returns an error if the service was already started.
    async fn start_and_await(&self) -> anyhow::Result<State>;

    /// Wait for service to start or stop (without sending any signal).
    async fn await_start_or_stop(&self) -> anyhow::Result<State>;

    /// Send a stop signal to the service without waiting for it to shutdown.
    /// Returns false if the service was already stopped, true if it is running.
    fn stop(&self) -> bool;

    /// Send stop signal to service and wait for it to shutdown.
    async fn stop_and_await(&self) -> anyhow::Result<State>;

    /// Wait for service to stop (without sending a stop signal).
    async fn await_stop(&self) -> anyhow::Result<State>;

    /// The current state of the service (i.e. `Started`, `Stopped`, etc..)
    fn state(&self) -> State;

    /// Returns the state watcher of the service.
    fn state_watcher(&self) -> StateWatcher;
}

/// Trait used by `ServiceRunner` to encapsulate the business logic tasks for a service.
#[async_trait::async_trait]
pub trait RunnableService: Send {
    /// The name of the runnable service, used for namespacing error messages.
    const NAME: &'static str;

    /// Service specific shared data. This is used when you have data that needs to be shared by
    /// one or more tasks. It is the implementors responsibility to ensure cloning this
    /// type is shallow and doesn't provide a full duplication of data that is meant
    /// to be shared between asynchronous processes.
    type SharedData: Clone + Send + Sync;

    /// The initialized runnable task type.
    type Task: RunnableTask;

    /// Optional parameters used to when initializing into task.
    type TaskParams: Send;

    /// A cloned instance of the shared data
    fn shared_data(&self) -> Self::SharedData;

    /// Converts the service into a runnable task before the main run loop.
    ///
    /// The `state` is a `State` watcher of the service. Some tasks may handle state changes
    /// on their own.
    async fn into_task(
        self,
        state_watcher: &StateWatcher,
        params: Self::TaskParams,
    ) -> anyhow::Result<Self::Task>;
}

/// The result of a single iteration of the task's run loop.
#[derive(Debug)]
pub enum TaskNextAction {
    /// Request the task to be run again
    Continue,
    /// Request the task to be abandoned
    Stop,
    /// Request the task to be run again, but report an error
    ErrorContinue(anyhow::Error),
}

impl From<anyhow::Result<bool>> for TaskNextAction {
    fn from(result: anyhow::Result<bool>) -> Self {
        match result {
            Ok(true) => TaskNextAction::Continue,
            Ok(false) => TaskNextAction::Stop,
            Err(e) => TaskNextAction::ErrorContinue(e),
        }
    }
}

/// The trait is implemented by the service task and contains a single iteration of the infinity
/// loop.
pub trait RunnableTask: Send {
    /// This function should contain the main business logic of the service task. It will run until
    /// the service either returns `TaskNextAction::Stop`, or the `watcher` leaves the `Started`
    /// state.
    fn run(
        &mut self,
        watcher: &mut StateWatcher,
    ) -> impl Future<Output = TaskNextAction> + Send;

    /// Gracefully shuts down the task after the main run loop has finished.
    fn shutdown(self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// The service runner manages the lifecycle, execution and error handling of a `RunnableService`.
/// It can be started and stopped, and the state of the service can be queried.
pub struct ServiceRunner<S>
where
    S: RunnableService + 'static,
{
    /// The shared state of the service
    pub shared: S::SharedData,
    state: Shared<watch::Sender<State>>,
}

impl<S> Drop for ServiceRunner<S>
where
    S: RunnableService + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S> ServiceRunner<S>
where
    S: RunnableService + 'static,
{
    /// Initializes a new `ServiceRunner` containing a `RunnableService`
    pub fn new(service: S) -> Self
    where
        S: RunnableService<TaskParams = ()>,
    {
        Self::new_with_params(service, ())
    }

    /// Initializes a new `ServiceRunner` containing a `RunnableService` with parameters for
    /// underlying `Task`
    pub fn new_with_params(service: S, params: S::TaskParams) -> Self {
        let shared = service.shared_data();
        let state = initialize_loop(service, params);
        Self { shared, state }
    }

    async fn _await_start_or_stop(
        &self,
        mut start: StateWatcher,
    ) -> anyhow::Result<State> {
        loop {
            let state = start.borrow().clone();
            if !state.starting() {
                return Ok(state)
            }
            start.changed().await?;
        }
    }

    async fn _await_stop(&self, mut stop: StateWatcher) -> anyhow::Result<State> {
        loop {
            let state = stop.borrow().clone();
            if state.stopped() {
                return Ok(state)
            }
            stop.changed().await?;
        }
    }
}

#[async_trait::async_trait]
impl<S> Service for ServiceRunner<S>
where
    S: RunnableService + 'static,
{
    fn start(&self) -> anyhow::Result<()> {
        let started = self.state.send_if_modified(|state| {
            if state.not_started() {
                *state = State::Starting;
                true
            } else {
                false
            }
        });

        if started {
            Ok(())
        } else {
            Err(anyhow!(
                "The service `{}` already has been started.",
                S::NAME
            ))
        }
    }

    async fn start_and_await(&self) -> anyhow::Result<State> {
        let start = self.state.subscribe().into();
        self.start()?;
        self._await_start_or_stop(start).await
    }

    async fn await_start_or_stop(&self) -> anyhow::Result<State> {
        let start = self.state.subscribe().into();
        self._await_start_or_stop(start).await
    }

    fn stop(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.not_started() || state.starting() || state.started() {
                *state = State::Stopping;
                true
            } else {
                false
            }
        })
    }

    async fn stop_and_await(&self) -> anyhow::Result<State> {
        let stop = self.state.subscribe().into();
        self.stop();
        self._await_stop(stop).await
    }

    async fn await_stop(&self) -> anyhow::Result<State> {
        let stop = self.state.subscribe().into();
        self._await_stop(stop).await
    }

    fn state(&self) -> State {
        self.state.borrow().clone()
    }

    fn state_watcher(&self) -> StateWatcher {
        self.state.subscribe().into()
    }
}

/// Initialize the background loop as a spawned task.
fn initialize_loop<S>(
    service: S,
    params: S::TaskParams,
) -> Shared<watch::Sender<State>>
where
    S: RunnableService + 'static,
{
    let (sender, _) = watch::channel(State::NotStarted);
    let state = Shared::new(sender);
    let stop_sender = state.clone();
    // Spawned as a task to check if the service is already running and to capture any panics.
    tokio::task::spawn(
        async move {
            tracing::debug!("running");
            let run = std::panic::AssertUnwindSafe(run(
                service,
                stop_sender.clone(),
                params,
            ));
            tracing::debug!("awaiting run");
            let result = run.catch_unwind().await;

            let stopped_state = if let Err(e) = result {
                let panic_information = panic_to_string(e);
                State::StoppedWithError(panic_information)
            } else {
                State::Stopped
            };

            tracing::debug!("shutting down {:?}", stopped_state);

            let _ = stop_sender.send_if_modified(|state| {
                if !state.stopped() {
                    *state = stopped_state.clone();
                    tracing::info!("Service {} is stopped", S::NAME);
                    true
                } else {
                    false
                }
            });
        }
        .instrument(tracing::info_span!("service", name = S::NAME)),
    );
    state
}

/// Main background run loop.
async fn run<S>(service: S, sender: Shared<watch::Sender<State>>, params: S::TaskParams)
where
    S: RunnableService + 'static,
{
    let mut state: StateWatcher = sender.subscribe().into();
    if state.borrow_and_update().not_started() {
        // The sender is kept alive by this function, so `changed` can't fail here.
        let _ = state.changed().await;
    }

    if !state.borrow_and_update().starting() {
        return
    }

    let mut task = match service.into_task(&state, params).await {
        Ok(task) => task,
        Err(err) => {
            tracing::error!("Service {} failed to initialize: {err:?}", S::NAME);
            sender.send_replace(State::StoppedWithError(err.to_string()));
            return
        }
    };

    let started = sender.send_if_modified(|s| {
        if s.starting() {
            *s = State::Started;
            true
        } else {
            false
        }
    });

    if started {
        tracing::info!("Service {} is started", S::NAME);
        run_task(&mut task, state).await;
    }

    tracing::info!("Shutting down {}", S::NAME);
    if let Err(err) = task.shutdown().await {
        tracing::error!("Shutdown of {} returned an error: {err:?}", S::NAME);
    }
}

async fn run_task<T: RunnableTask>(task: &mut T, mut state: StateWatcher) {
    while state.borrow_and_update().started() {
        match task.run(&mut state).await {
            TaskNextAction::Continue => {}
            TaskNextAction::Stop => break,
            TaskNextAction::ErrorContinue(err) => {
                tracing::error!("The task returned an error: {err:?}");
            }
        }
    }
}

fn panic_to_string(e: Box<dyn Any + Send>) -> String {
    match e.downcast::<String>() {
        Ok(v) => *v,
        Err(e) => match e.downcast::<&str>() {
            Ok(v) => v.to_string(),
            _ => "Unknown panic".to_string(),
        },
    }
}
