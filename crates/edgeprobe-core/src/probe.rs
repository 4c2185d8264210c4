//! 通过本地 SOCKS 隧道发起 HTTP 测试请求
//!
//! 每次测试的结果都是 [`TrialOutcome`]，失败原因带标签，
//! 上层聚合时可以区分超时、进程退出、零字节等情况。

use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;
use crate::config::{BenchSettings, ProbeKind};

/// curl 的超时退出码
const CURL_TIMEOUT_EXIT: i32 = 28;

/// curl 自身超时之外再留给进程退出的余量
const PROCESS_SLACK: Duration = Duration::from_secs(2);

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

/// 单次测试失败的原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TrialFailure {
    /// 代理客户端无法启动
    #[error("proxy client failed to launch: {0}")]
    Launch(String),
    /// 代理客户端启动后未就绪
    #[error("proxy client not ready: {0}")]
    Startup(String),
    #[error("timed out")]
    Timeout,
    /// 请求进程非零退出，被信号终止时为 -1
    #[error("exited with status {0}")]
    ExitStatus(i32),
    #[error("received zero bytes")]
    ZeroBytes,
    #[error("non-positive elapsed time")]
    ZeroElapsed,
    #[error("io error: {0}")]
    Io(String),
    #[error("request failed: {0}")]
    Request(String),
    /// 整个运行被取消
    #[error("cancelled")]
    Cancelled,
}

pub type TrialOutcome<T> = std::result::Result<T, TrialFailure>;

/// 本地 SOCKS 入站
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunnel {
    pub port: u16,
}

impl Tunnel {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// 由代理端解析域名
    pub fn socks_url(&self) -> String {
        format!("socks5h://127.0.0.1:{}", self.port)
    }
}

/// 一次下载的字节数与耗时
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transfer {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Transfer {
    /// 速率（KiB/s）；零字节或零耗时不算成功
    pub fn rate_kib_s(&self) -> TrialOutcome<f64> {
        if self.bytes == 0 {
            return Err(TrialFailure::ZeroBytes);
        }
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return Err(TrialFailure::ZeroElapsed);
        }
        Ok(self.bytes as f64 / 1024.0 / secs)
    }
}

/// HTTP 探测器
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// 只取响应头，返回耗时
    async fn head(&self, tunnel: &Tunnel, url: &str) -> TrialOutcome<Duration>;

    /// Range 下载最多 `max_bytes` 字节到 `dest`
    async fn download(
        &self,
        tunnel: &Tunnel,
        url: &str,
        max_bytes: u64,
        dest: &Path,
    ) -> TrialOutcome<Transfer>;

    fn name(&self) -> &'static str;
}

/// 根据配置选择探测器
pub fn from_settings(bench: &BenchSettings) -> Arc<dyn HttpProbe> {
    let request_timeout = Duration::from_secs(bench.request_timeout_secs);
    match bench.probe {
        ProbeKind::Curl => Arc::new(CurlProbe::new(bench.curl_bin.clone(), request_timeout)),
        ProbeKind::Reqwest => Arc::new(ReqwestProbe::new(request_timeout)),
    }
}

fn range_header(max_bytes: u64) -> String {
    format!("0-{}", max_bytes.saturating_sub(1))
}

/// 调用外部 curl
#[derive(Debug, Clone)]
pub struct CurlProbe {
    bin: String,
    request_timeout: Duration,
}

impl CurlProbe {
    pub fn new(bin: impl Into<String>, request_timeout: Duration) -> Self {
        Self { bin: bin.into(), request_timeout }
    }

    async fn run(&self, tunnel: &Tunnel, args: &[&str], url: &str) -> TrialOutcome<()> {
        let max_time = format!("{:.1}", self.request_timeout.as_secs_f64());
        let proxy = tunnel.socks_url();

        let mut cmd = Command::new(&self.bin);
        cmd.arg("-sS")
            .args(args)
            .args(["--max-time", max_time.as_str(), "-x", proxy.as_str(), url])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(self.request_timeout + PROCESS_SLACK, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(TrialFailure::Io(format!("{}: {}", self.bin, e))),
            Err(_) => return Err(TrialFailure::Timeout),
        };

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("{} 失败 ({}): {}", self.bin, output.status, stderr.trim());
        match output.status.code() {
            Some(CURL_TIMEOUT_EXIT) => Err(TrialFailure::Timeout),
            Some(code) => Err(TrialFailure::ExitStatus(code)),
            None => Err(TrialFailure::ExitStatus(-1)),
        }
    }
}

#[async_trait]
impl HttpProbe for CurlProbe {
    async fn head(&self, tunnel: &Tunnel, url: &str) -> TrialOutcome<Duration> {
        let start = Instant::now();
        self.run(tunnel, &["-I", "-o", NULL_DEVICE], url).await?;
        Ok(start.elapsed())
    }

    async fn download(
        &self,
        tunnel: &Tunnel,
        url: &str,
        max_bytes: u64,
        dest: &Path,
    ) -> TrialOutcome<Transfer> {
        let range = range_header(max_bytes);
        let dest_str = dest.to_string_lossy();

        let start = Instant::now();
        self.run(tunnel, &["-r", range.as_str(), "-o", dest_str.as_ref()], url).await?;
        let elapsed = start.elapsed();

        // 服务端可能忽略 Range，按实际写入的字节数计算
        let bytes = match tokio::fs::metadata(dest).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(TrialFailure::Io(e.to_string())),
        };
        Ok(Transfer { bytes, elapsed })
    }

    fn name(&self) -> &'static str {
        "curl"
    }
}

/// 进程内 reqwest 客户端
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    request_timeout: Duration,
}

impl ReqwestProbe {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    fn client(&self, tunnel: &Tunnel) -> TrialOutcome<reqwest::Client> {
        let proxy = reqwest::Proxy::all(tunnel.socks_url()).map_err(request_failure)?;
        reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.request_timeout)
            .build()
            .map_err(request_failure)
    }
}

fn request_failure(err: reqwest::Error) -> TrialFailure {
    if err.is_timeout() {
        TrialFailure::Timeout
    } else {
        TrialFailure::Request(err.to_string())
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn head(&self, tunnel: &Tunnel, url: &str) -> TrialOutcome<Duration> {
        let client = self.client(tunnel)?;
        let start = Instant::now();
        // 与 curl -I 一致，任何状态码都算拿到了响应
        let resp = client.head(url).send().await.map_err(request_failure)?;
        let elapsed = start.elapsed();
        debug!("HEAD {} -> {}", url, resp.status());
        Ok(elapsed)
    }

    async fn download(
        &self,
        tunnel: &Tunnel,
        url: &str,
        max_bytes: u64,
        dest: &Path,
    ) -> TrialOutcome<Transfer> {
        let client = self.client(tunnel)?;
        let io_failure = |e: std::io::Error| TrialFailure::Io(e.to_string());

        let start = Instant::now();
        let mut resp = client
            .get(url)
            .header(reqwest::header::RANGE, format!("bytes={}", range_header(max_bytes)))
            .send()
            .await
            .map_err(request_failure)?;

        let mut file = tokio::fs::File::create(dest).await.map_err(io_failure)?;
        let mut bytes = 0u64;
        while bytes < max_bytes {
            let Some(chunk) = resp.chunk().await.map_err(request_failure)? else {
                break;
            };
            let take = chunk.len().min((max_bytes - bytes) as usize);
            file.write_all(&chunk[..take]).await.map_err(io_failure)?;
            bytes += take as u64;
        }
        file.flush().await.map_err(io_failure)?;

        Ok(Transfer { bytes, elapsed: start.elapsed() })
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }
}
