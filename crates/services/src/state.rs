//! The module related to state of the service.

use tokio::sync::watch;

/// The lifecycle state of the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Service is initialized but not started
    NotStarted,
    /// Service is starting up
    Starting,
    /// Service is running as normal
    Started,
    /// Service is shutting down
    Stopping,
    /// Service is stopped
    Stopped,
    /// Service shutdown due to an error (panic)
    StoppedWithError(String),
}

impl State {
    /// is not started
    pub fn not_started(&self) -> bool {
        self == &State::NotStarted
    }

    /// is starting
    pub fn starting(&self) -> bool {
        self == &State::Starting
    }

    /// is started
    pub fn started(&self) -> bool {
        self == &State::Started
    }

    /// is stopped
    pub fn stopped(&self) -> bool {
        matches!(self, State::Stopped | State::StoppedWithError(_))
    }

    /// is stopping
    pub fn stopping(&self) -> bool {
        self == &State::Stopping
    }
}

/// The wrapper around the `watch::Receiver<State>`. It repeats the `Receiver` functionality +
/// a new one.
#[derive(Clone)]
pub struct StateWatcher(watch::Receiver<State>);

#[cfg(any(test, feature = "test-helpers"))]
impl Default for StateWatcher {
    fn default() -> Self {
        let (_, receiver) = watch::channel(State::NotStarted);
        Self(receiver)
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl StateWatcher {
    /// Create a new `StateWatcher` with the `State::Started` state.
    pub fn started() -> Self {
        let (sender, receiver) = watch::channel(State::Started);
        // Keep the sender alive for the whole test, otherwise `changed` resolves immediately.
        std::mem::forget(sender);
        Self(receiver)
    }
}

impl StateWatcher {
    /// See [`watch::Receiver::borrow`].
    pub fn borrow(&self) -> watch::Ref<'_, State> {
        self.0.borrow()
    }

    /// See [`watch::Receiver::borrow_and_update`].
    pub fn borrow_and_update(&mut self) -> watch::Ref<'_, State> {
        self.0.borrow_and_update()
    }

    /// See [`watch::Receiver::changed`].
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.0.changed().await
    }

    /// Future that resolves as soon as the state is no longer `Started`.
    pub async fn while_started(&mut self) -> anyhow::Result<State> {
        loop {
            let state = self.borrow_and_update().clone();
            if !state.started() {
                return Ok(state);
            }

            self.changed().await?;
        }
    }
}

impl From<watch::Receiver<State>> for StateWatcher {
    fn from(receiver: watch::Receiver<State>) -> Self {
        Self(receiver)
    }
}
