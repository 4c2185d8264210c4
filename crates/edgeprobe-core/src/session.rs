//! 代理客户端子进程的生命周期
//!
//! 每个端点独占一个工作目录和一个本地端口；[`ProxySession::shutdown`]
//! 负责结束子进程并删除目录，future 被中途丢弃时由 [`WorkDir`] 的
//! `Drop` 和 `kill_on_drop` 兜底。

use serde_json::{json, Value};
use std::io;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, warn};
use uuid::Uuid;
use crate::config::{BenchSettings, Profile, StartupWait, CONFIG_PLACEHOLDER};
use crate::endpoint::Endpoint;
use crate::probe::{TrialFailure, TrialOutcome, Tunnel};
use crate::render::xray_outbound;

const CONFIG_FILE: &str = "config.json";
const LOG_FILE: &str = "client.log";
const ARTIFACT_FILE: &str = "download.bin";

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// 端点专用的临时目录，释放时删除
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    removed: bool,
}

impl WorkDir {
    /// 在 `root` 下创建 `edgeprobe-<uuid>` 目录
    pub fn create_in(root: &Path) -> io::Result<Self> {
        let path = root.join(format!("edgeprobe-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path, removed: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(mut self) {
        self.removed = true;
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("删除临时目录 {} 失败: {}", self.path.display(), e);
            }
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

/// 分配本地入站端口：配置了起点时按任务序号偏移，否则由系统分配
///
/// 端口在子进程启动前就已释放，不保证届时仍然空闲。若其他进程占用了该端口，
/// 轮询连接会成功而代理客户端绑定失败，因此就绪判定在连接成功后还会再
/// 确认一次子进程仍在运行。
pub fn allocate_port(base: Option<u16>, index: usize) -> io::Result<u16> {
    match base {
        Some(base) => u16::try_from(index)
            .ok()
            .and_then(|offset| base.checked_add(offset))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("local port {} + {} out of range", base, index),
                )
            }),
        None => Ok(TcpListener::bind(("127.0.0.1", 0))?.local_addr()?.port()),
    }
}

/// 代理客户端配置：本地 SOCKS 入站 + 指向端点的出站
pub fn client_config(port: u16, endpoint: &Endpoint, profile: &Profile) -> Value {
    json!({
        "log": { "loglevel": "warning" },
        "inbounds": [{
            "tag": "socks-in",
            "listen": "127.0.0.1",
            "port": port,
            "protocol": "socks",
            "settings": {
                "auth": "noauth",
                "udp": false
            }
        }],
        "outbounds": [ xray_outbound(endpoint, profile) ]
    })
}

/// 结束后收集到的子进程信息
#[derive(Debug, Clone, Default)]
pub struct SessionOutput {
    /// 退出码，被信号终止或超时未退出时为 None
    pub status: Option<i32>,
    /// 子进程 stdout/stderr
    pub log: String,
}

/// 一个运行中的代理客户端
#[derive(Debug)]
pub struct ProxySession {
    child: Child,
    workdir: WorkDir,
    tunnel: Tunnel,
    label: String,
}

impl ProxySession {
    /// 写配置、启动子进程并等待就绪；失败时已完成清理
    pub async fn launch(
        endpoint: &Endpoint,
        profile: &Profile,
        bench: &BenchSettings,
        port: u16,
        work_root: &Path,
    ) -> TrialOutcome<Self> {
        let launch_failure = |e: io::Error| TrialFailure::Launch(e.to_string());

        let workdir = WorkDir::create_in(work_root).map_err(launch_failure)?;
        let config_path = workdir.path().join(CONFIG_FILE);
        let config = client_config(port, endpoint, profile);
        let body = serde_json::to_vec_pretty(&config)
            .map_err(|e| TrialFailure::Launch(e.to_string()))?;
        tokio::fs::write(&config_path, body).await.map_err(launch_failure)?;

        let log = std::fs::File::create(workdir.path().join(LOG_FILE)).map_err(launch_failure)?;
        let log_err = log.try_clone().map_err(launch_failure)?;

        let config_arg = config_path.to_string_lossy();
        let args: Vec<String> = bench
            .xray_args
            .iter()
            .map(|a| a.replace(CONFIG_PLACEHOLDER, &config_arg))
            .collect();

        let child = Command::new(&bench.xray_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    TrialFailure::Launch(format!("{} not found", bench.xray_bin))
                }
                _ => TrialFailure::Launch(format!("spawn {}: {}", bench.xray_bin, e)),
            })?;

        debug!("{} 代理客户端已启动, 本地端口 {}", endpoint, port);
        let mut session = Self {
            child,
            workdir,
            tunnel: Tunnel::new(port),
            label: endpoint.to_string(),
        };

        if let Err(failure) = session.wait_ready(bench.startup).await {
            let output = session.shutdown().await;
            debug!("{} 代理客户端输出:\n{}", endpoint, output.log.trim_end());
            return Err(failure);
        }
        Ok(session)
    }

    pub fn tunnel(&self) -> &Tunnel {
        &self.tunnel
    }

    /// 下载测试的临时文件
    pub fn artifact_path(&self) -> PathBuf {
        self.workdir.path().join(ARTIFACT_FILE)
    }

    fn exited(&mut self) -> TrialOutcome<Option<ExitStatus>> {
        self.child
            .try_wait()
            .map_err(|e| TrialFailure::Startup(e.to_string()))
    }

    async fn wait_ready(&mut self, startup: StartupWait) -> TrialOutcome<()> {
        match startup {
            StartupWait::Fixed { grace_ms } => {
                tokio::time::sleep(Duration::from_millis(grace_ms)).await;
                if let Some(status) = self.exited()? {
                    return Err(TrialFailure::Startup(format!("proxy client exited early ({})", status)));
                }
                Ok(())
            }
            StartupWait::Poll { timeout_ms } => {
                let limit = Duration::from_millis(timeout_ms);
                let started = Instant::now();
                loop {
                    if let Some(status) = self.exited()? {
                        return Err(TrialFailure::Startup(format!("proxy client exited early ({})", status)));
                    }
                    if TcpStream::connect(("127.0.0.1", self.tunnel.port)).await.is_ok() {
                        // 端口可能被其他进程占用，留出时间让绑定失败的客户端退出
                        tokio::time::sleep(POLL_INTERVAL).await;
                        if let Some(status) = self.exited()? {
                            return Err(TrialFailure::Startup(format!(
                                "proxy client exited ({}) while port {} was answering",
                                status, self.tunnel.port
                            )));
                        }
                        debug!("{} 本地端口就绪, 用时 {:?}", self.label, started.elapsed());
                        return Ok(());
                    }
                    if started.elapsed() >= limit {
                        return Err(TrialFailure::Startup(format!(
                            "port {} not listening after {}ms",
                            self.tunnel.port, timeout_ms
                        )));
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// 结束子进程、收集输出并删除工作目录
    pub async fn shutdown(mut self) -> SessionOutput {
        // 已经退出的进程 kill 会报错，忽略
        let _ = self.child.start_kill();
        let status = match tokio::time::timeout(EXIT_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                warn!("{} 等待代理客户端退出失败: {}", self.label, e);
                None
            }
            Err(_) => {
                warn!("{} 代理客户端未在 {:?} 内退出", self.label, EXIT_TIMEOUT);
                None
            }
        };

        let log = tokio::fs::read_to_string(self.workdir.path().join(LOG_FILE))
            .await
            .unwrap_or_default();
        self.workdir.remove().await;

        SessionOutput { status, log }
    }
}
