//! edgeprobe Core - endpoint list parsing, share-config rendering and tunnelled benchmarking
//!
//! This library provides the core functionality behind the `edgeprobe emit` and
//! `edgeprobe bench` commands.

// 导出模块
pub mod config;
pub mod endpoint;
pub mod error;
pub mod export;
pub mod probe;
pub mod ranking;
pub mod render;
pub mod session;
pub mod stats;
pub mod tester;

// 从模块导出核心类型
pub use config::{BenchSettings, EmitSettings, ProbeKind, Profile, Settings, StartupWait};
pub use endpoint::{Endpoint, EndpointList, LineError, RejectedLine};
pub use error::{Error, Result};
pub use probe::{CurlProbe, HttpProbe, ReqwestProbe, TrialFailure, TrialOutcome, Tunnel};
pub use ranking::{rank, Winners};
pub use render::OutputBundle;
pub use session::ProxySession;
pub use stats::{EndpointResult, LATENCY_SENTINEL};
pub use tester::{cancellation, Benchmarker, CancelHandle, Cancellation};

/// Initialize the logger; `RUST_LOG` takes precedence over `default_level`
pub fn init_logger(default_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
