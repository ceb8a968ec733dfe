use ctor::ctor;
use std::env::var;
use tracing_subscriber::{
    EnvFilter,
    fmt::format,
};

// Installs a global subscriber for the test binary when `GRAFT_TRACE` is set.
//
// `RUST_LOG` drives the filter, e.g. `GRAFT_TRACE=compact RUST_LOG=graft_subscriptions=debug`.
#[ctor]
pub static TRACE: () = {
    if let Ok(v) = var("GRAFT_TRACE") {
        match v.to_lowercase().as_str() {
            "1" | "true" | "on" => {
                let _ = tracing_subscriber::FmtSubscriber::builder()
                    .with_env_filter(EnvFilter::from_default_env())
                    .with_test_writer()
                    .try_init();
            }
            "compact" => {
                let _ = tracing_subscriber::FmtSubscriber::builder()
                    .with_env_filter(EnvFilter::from_default_env())
                    .event_format(format().compact())
                    .with_test_writer()
                    .try_init();
            }
            "pretty" => {
                let _ = tracing_subscriber::FmtSubscriber::builder()
                    .with_env_filter(EnvFilter::from_default_env())
                    .event_format(format().pretty())
                    .with_test_writer()
                    .try_init();
            }
            _ => (),
        }
    }
};

#[macro_export]
macro_rules! enable_tracing {
    () => {
        static _TRACE: &$crate::TRACE<()> = &$crate::TRACE;
    };
}
