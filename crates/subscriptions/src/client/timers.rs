use crate::{
    client::ClientProxy,
    config::ClientConfig,
    ports::GraphSchema,
    protocol::ClientProtocol,
};
use tokio::time::{
    Instant,
    MissedTickBehavior,
};
use tokio_util::sync::{
    CancellationToken,
    DropGuard,
};

/// Keep-alive and initialization timers of one connection.
///
/// Both timers stop when this value is dropped. A timer that already fired
/// finishes its action.
pub(crate) struct ConnectionTimers {
    _cancel_on_drop: DropGuard,
}

impl ConnectionTimers {
    pub fn start<S, P>(proxy: &ClientProxy<S, P>, config: &ClientConfig) -> Self
    where
        S: GraphSchema,
        P: ClientProtocol,
    {
        let cancel = CancellationToken::new();

        if let Some(timeout) = config.initialization_timeout {
            let proxy = proxy.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        if !proxy.is_initialized() {
                            proxy.initialization_timed_out().await;
                        }
                    }
                }
            });
        }

        if let Some(period) = config.keep_alive_interval {
            let proxy = proxy.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => proxy.keep_alive().await,
                    }
                }
            });
        }

        Self {
            _cancel_on_drop: cancel.drop_guard(),
        }
    }
}
