#![deny(clippy::cast_possible_truncation)]

mod service;
mod state;

/// Utilities for shared values that are mutated by one service and read by others.
pub mod sync {
    use std::{
        ops::Deref,
        sync::Arc,
    };

    /// Alias for `Arc<T>`, used by services to express ownership shared with the runner.
    #[derive(Debug, Default)]
    pub struct Shared<T>(Arc<T>);

    impl<T> Shared<T> {
        pub fn new(t: T) -> Self {
            Self(Arc::new(t))
        }
    }

    impl<T> Clone for Shared<T> {
        fn clone(&self) -> Self {
            Self(self.0.clone())
        }
    }

    impl<T> Deref for Shared<T> {
        type Target = T;

        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }
}

pub use service::{
    RunnableService,
    RunnableTask,
    Service,
    ServiceRunner,
    TaskNextAction,
};
pub use state::{
    State,
    StateWatcher,
};
pub use sync::Shared;
