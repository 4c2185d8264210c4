use futures::stream::{self, StreamExt};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use crate::config::{BenchSettings, Profile, Settings};
use crate::endpoint::Endpoint;
use crate::probe::{self, HttpProbe, TrialFailure, TrialOutcome};
use crate::session::{allocate_port, ProxySession};
use crate::stats::EndpointResult;

/// 触发整个运行的取消
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// 每个测试都会与它竞争
#[derive(Debug, Clone)]
pub struct Cancellation(watch::Receiver<bool>);

impl Cancellation {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// 取消后返回；发送端已释放且未取消时永不返回
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), Cancellation(rx))
}

/// 端点测速器
pub struct Benchmarker {
    profile: Profile,
    options: BenchSettings,
    probe: Arc<dyn HttpProbe>,
    cancel: Cancellation,
    work_root: PathBuf,
}

impl Benchmarker {
    pub fn new(
        profile: Profile,
        options: BenchSettings,
        probe: Arc<dyn HttpProbe>,
        cancel: Cancellation,
    ) -> Self {
        Self {
            profile,
            options,
            probe,
            cancel,
            work_root: std::env::temp_dir(),
        }
    }

    /// 按配置选择探测器
    pub fn from_settings(settings: &Settings, cancel: Cancellation) -> Self {
        let probe = probe::from_settings(&settings.bench);
        Self::new(settings.profile.clone(), settings.bench.clone(), probe, cancel)
    }

    /// 临时目录的父目录，默认系统临时目录
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = root.into();
        self
    }

    pub fn probe_name(&self) -> &'static str {
        self.probe.name()
    }

    /// 测试所有端点，最多 `max_concurrency` 个交错进行；结果按输入顺序返回
    pub async fn run_all<F>(&self, endpoints: &[Endpoint], mut on_done: F) -> Vec<EndpointResult>
    where
        F: FnMut(&EndpointResult),
    {
        info!(
            "开始测试 {} 个端点 (并发 {}, 探测器 {})",
            endpoints.len(),
            self.options.max_concurrency,
            self.probe.name()
        );

        let mut slots: Vec<Option<EndpointResult>> = vec![None; endpoints.len()];
        let mut pending = stream::iter(endpoints.iter().enumerate())
            .map(|(idx, endpoint)| async move { (idx, self.benchmark_endpoint(idx, endpoint).await) })
            .buffer_unordered(self.options.max_concurrency.max(1));

        while let Some((idx, result)) = pending.next().await {
            on_done(&result);
            slots[idx] = Some(result);
        }

        slots.into_iter().flatten().collect()
    }

    /// 单个端点的完整流程：启动客户端、测延迟、测速、清理、汇总
    pub async fn benchmark_endpoint(&self, index: usize, endpoint: &Endpoint) -> EndpointResult {
        let latency_trials = self.options.latency_trials;
        let throughput_trials = self.options.throughput_trials;

        if self.cancel.is_cancelled() {
            return EndpointResult::failed(endpoint.clone(), latency_trials, throughput_trials, TrialFailure::Cancelled);
        }

        let port = match allocate_port(self.options.local_port_base, index) {
            Ok(port) => port,
            Err(e) => {
                warn!("{} 无法分配本地端口: {}", endpoint, e);
                return EndpointResult::failed(
                    endpoint.clone(),
                    latency_trials,
                    throughput_trials,
                    TrialFailure::Launch(e.to_string()),
                );
            }
        };

        let launch = ProxySession::launch(endpoint, &self.profile, &self.options, port, &self.work_root);
        let session = match self.guarded(launch).await {
            Ok(session) => session,
            Err(failure) => {
                warn!("{} 代理客户端不可用: {}", endpoint, failure);
                return EndpointResult::failed(endpoint.clone(), latency_trials, throughput_trials, failure);
            }
        };

        let mut latency = Vec::with_capacity(latency_trials);
        for round in 0..latency_trials {
            let outcome = self
                .guarded(self.probe.head(session.tunnel(), &self.options.latency_url))
                .await;
            debug!("{} 延迟 #{}: {:?}", endpoint, round + 1, outcome);
            latency.push(outcome);
        }

        let mut throughput = Vec::with_capacity(throughput_trials);
        for round in 0..throughput_trials {
            let outcome = self.throughput_trial(&session).await;
            debug!("{} 速率 #{}: {:?}", endpoint, round + 1, outcome);
            throughput.push(outcome);
        }

        let output = session.shutdown().await;
        if !output.log.trim().is_empty() {
            debug!("{} 代理客户端输出:\n{}", endpoint, output.log.trim_end());
        }

        let result = EndpointResult::aggregate(endpoint.clone(), latency, throughput);
        info!(
            "{} 完成: 延迟 {:.1}ms, 抖动 {:.1}ms, 速率 {:.1}KiB/s",
            endpoint, result.latency_ms, result.jitter_ms, result.throughput_kib_s
        );
        result
    }

    /// 一次下载测试，失败时最多重试 `throughput_retries` 次
    async fn throughput_trial(&self, session: &ProxySession) -> TrialOutcome<f64> {
        let artifact = session.artifact_path();
        let attempts = self.options.throughput_retries + 1;
        let mut last = TrialFailure::ZeroBytes;

        for attempt in 1..=attempts {
            let outcome = self
                .guarded(self.probe.download(
                    session.tunnel(),
                    &self.options.download_url,
                    self.options.download_bytes,
                    &artifact,
                ))
                .await
                .and_then(|transfer| transfer.rate_kib_s());

            if let Err(e) = tokio::fs::remove_file(&artifact).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("删除下载文件 {} 失败: {}", artifact.display(), e);
                }
            }

            match outcome {
                Ok(rate) => return Ok(rate),
                Err(TrialFailure::Cancelled) => return Err(TrialFailure::Cancelled),
                Err(failure) => {
                    debug!("下载第 {}/{} 次失败: {}", attempt, attempts, failure);
                    last = failure;
                }
            }
        }

        Err(last)
    }

    /// 把取消转换为测试失败
    async fn guarded<T, F>(&self, trial: F) -> TrialOutcome<T>
    where
        F: Future<Output = TrialOutcome<T>>,
    {
        let mut cancel = self.cancel.clone();
        if cancel.is_cancelled() {
            return Err(TrialFailure::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TrialFailure::Cancelled),
            outcome = trial => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StartupWait;
    use crate::probe::{Transfer, Tunnel};
    use crate::stats::LATENCY_SENTINEL;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 按预设序列返回结果的探测器
    struct ScriptedProbe {
        downloads: Vec<TrialOutcome<u64>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpProbe for ScriptedProbe {
        async fn head(&self, _tunnel: &Tunnel, _url: &str) -> TrialOutcome<Duration> {
            Ok(Duration::from_millis(50))
        }

        async fn download(&self, _tunnel: &Tunnel, _url: &str, _max: u64, dest: &Path) -> TrialOutcome<Transfer> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let bytes = self.downloads.get(call).cloned().unwrap_or(Ok(0))?;
            std::fs::write(dest, vec![0u8; bytes as usize]).map_err(|e| TrialFailure::Io(e.to_string()))?;
            Ok(Transfer { bytes, elapsed: Duration::from_millis(500) })
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// 请求永远不会完成的探测器
    struct StalledProbe;

    #[async_trait]
    impl HttpProbe for StalledProbe {
        async fn head(&self, _tunnel: &Tunnel, _url: &str) -> TrialOutcome<Duration> {
            std::future::pending().await
        }

        async fn download(&self, _tunnel: &Tunnel, _url: &str, _max: u64, _dest: &Path) -> TrialOutcome<Transfer> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    fn options(bin: &str, args: &[&str]) -> BenchSettings {
        BenchSettings {
            xray_bin: bin.to_string(),
            xray_args: args.iter().map(|s| s.to_string()).collect(),
            latency_trials: 3,
            throughput_trials: 2,
            throughput_retries: 2,
            startup: StartupWait::Fixed { grace_ms: 20 },
            ..BenchSettings::default()
        }
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[test_log::test(tokio::test)]
    async fn launch_failure_yields_sentinel_result() {
        let root = tempfile::tempdir().unwrap();
        let (_handle, cancel) = cancellation();
        let probe = Arc::new(ScriptedProbe { downloads: vec![], calls: AtomicUsize::new(0) });
        let bench = Benchmarker::new(Profile::default(), options("/nonexistent/xray", &["{config}"]), probe, cancel)
            .with_work_root(root.path());

        let results = bench.run_all(&[Endpoint::new("1.2.3.4", 443)], |_| {}).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].latency_ms, LATENCY_SENTINEL);
        assert_eq!(results[0].jitter_ms, 0.0);
        assert_eq!(results[0].throughput_kib_s, 0.0);
        assert!(matches!(results[0].failures[0], TrialFailure::Launch(_)));
        assert!(is_empty_dir(root.path()));
    }

    #[cfg(unix)]
    #[test_log::test(tokio::test)]
    async fn throughput_retries_until_bytes_arrive() {
        let root = tempfile::tempdir().unwrap();
        let (_handle, cancel) = cancellation();
        let probe = Arc::new(ScriptedProbe {
            // 第一次测试：失败两次后成功；第二次测试：直接成功
            downloads: vec![Err(TrialFailure::Timeout), Ok(0), Ok(1024), Ok(2048)],
            calls: AtomicUsize::new(0),
        });
        let bench = Benchmarker::new(
            Profile::default(),
            options("sh", &["-c", "sleep 30", "{config}"]),
            probe.clone(),
            cancel,
        )
        .with_work_root(root.path());

        let result = bench.benchmark_endpoint(0, &Endpoint::new("1.2.3.4", 443)).await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.latency_ok, 3);
        assert_eq!(result.throughput_ok, 2);
        // 1024B/0.5s = 2 KiB/s, 2048B/0.5s = 4 KiB/s
        assert!((result.throughput_kib_s - 3.0).abs() < 1e-9);
        assert!(result.failures.is_empty());
        assert!(is_empty_dir(root.path()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exhausted_retries_report_last_failure() {
        let root = tempfile::tempdir().unwrap();
        let (_handle, cancel) = cancellation();
        let probe = Arc::new(ScriptedProbe {
            downloads: vec![Err(TrialFailure::Timeout), Err(TrialFailure::ExitStatus(56)), Ok(0)],
            calls: AtomicUsize::new(0),
        });
        let mut opts = options("sh", &["-c", "sleep 30", "{config}"]);
        opts.throughput_trials = 1;
        let bench = Benchmarker::new(Profile::default(), opts, probe, cancel).with_work_root(root.path());

        let result = bench.benchmark_endpoint(0, &Endpoint::new("1.2.3.4", 443)).await;

        assert_eq!(result.throughput_kib_s, 0.0);
        assert_eq!(result.failures, vec![TrialFailure::ZeroBytes]);
    }

    #[tokio::test]
    async fn cancelled_run_converts_every_trial() {
        let root = tempfile::tempdir().unwrap();
        let (handle, cancel) = cancellation();
        handle.cancel();
        let probe = Arc::new(ScriptedProbe { downloads: vec![], calls: AtomicUsize::new(0) });
        let bench = Benchmarker::new(Profile::default(), options("sh", &["{config}"]), probe, cancel)
            .with_work_root(root.path());

        let mut seen = 0;
        let results = bench
            .run_all(&[Endpoint::new("1.2.3.4", 443), Endpoint::new("5.6.7.8", 8080)], |_| seen += 1)
            .await;

        assert_eq!(seen, 2);
        assert_eq!(results[1].endpoint, Endpoint::new("5.6.7.8", 8080));
        assert!(results
            .iter()
            .all(|r| r.failures.iter().all(|f| *f == TrialFailure::Cancelled)));
        assert!(is_empty_dir(root.path()));
    }

    #[cfg(unix)]
    #[test_log::test(tokio::test)]
    async fn cancellation_during_trials_still_tears_down() {
        let root = tempfile::tempdir().unwrap();
        let (handle, cancel) = cancellation();
        let bench = Benchmarker::new(
            Profile::default(),
            options("sh", &["-c", "sleep 30", "{config}"]),
            Arc::new(StalledProbe),
            cancel,
        )
        .with_work_root(root.path());

        // 客户端在 20ms 后就绪，第一个延迟测试随后卡住
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            bench.benchmark_endpoint(0, &Endpoint::new("1.2.3.4", 443)),
        )
        .await
        .unwrap();

        assert_eq!(result.failures, vec![TrialFailure::Cancelled; 5]);
        assert_eq!(result.latency_ms, LATENCY_SENTINEL);
        assert_eq!(result.throughput_kib_s, 0.0);
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_never_cancels() {
        let (handle, mut cancel) = cancellation();
        drop(handle);
        assert!(!cancel.is_cancelled());
        // 暂停的时钟会直接推进到超时点
        let waited = tokio::time::timeout(Duration::from_secs(3600), cancel.cancelled()).await;
        assert!(waited.is_err());
    }
}
