//! edgeprobe - share-config emitter and tunnelled benchmarker for CDN edge endpoints
//!
//! Re-exports the core library and the CLI definitions used by the binary.

// 重导出core库
pub use edgeprobe_core::{
    Settings, Profile, BenchSettings, EmitSettings, ProbeKind, StartupWait,
    Error, Result,
    Endpoint, EndpointList,
    OutputBundle,
    Benchmarker, CancelHandle, Cancellation, cancellation,
    EndpointResult, Winners, rank,
    init_logger,
};
pub use edgeprobe_cli::{Cli, Command};

// 命令行输出
pub mod ui;
