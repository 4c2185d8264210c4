use serde::Serialize;
use std::time::Duration;
use crate::endpoint::Endpoint;
use crate::probe::{TrialFailure, TrialOutcome};

/// 没有任何成功延迟样本时的延迟值
pub const LATENCY_SENTINEL: f64 = -1.0;

pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// 样本标准差（n-1），少于两个样本时为 0
pub fn sample_std_dev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let var = samples
        .iter()
        .map(|&x| {
            let dx = x - mean;
            dx * dx
        })
        .sum::<f64>()
        / (samples.len() - 1) as f64;
    var.sqrt()
}

/// KiB/s 换算为 Mbit/s
pub fn kib_s_to_mbit_s(kib_s: f64) -> f64 {
    kib_s * 1024.0 * 8.0 / 1_000_000.0
}

/// 单个端点的测试结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointResult {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    /// 平均延迟（毫秒），无成功样本时为 -1
    pub latency_ms: f64,
    /// 延迟样本标准差（毫秒）
    pub jitter_ms: f64,
    /// 平均下载速率（KiB/s），无成功样本时为 0
    pub throughput_kib_s: f64,
    /// 同一速率的 Mbit/s 表示
    pub throughput_mbit_s: f64,
    pub latency_ok: usize,
    pub latency_trials: usize,
    pub throughput_ok: usize,
    pub throughput_trials: usize,
    pub latency_samples_ms: Vec<f64>,
    pub throughput_samples_kib_s: Vec<f64>,
    /// 所有失败测试的原因
    pub failures: Vec<TrialFailure>,
}

impl EndpointResult {
    /// 汇总一个端点的全部测试
    pub fn aggregate(
        endpoint: Endpoint,
        latency: Vec<TrialOutcome<Duration>>,
        throughput: Vec<TrialOutcome<f64>>,
    ) -> Self {
        let latency_trials = latency.len();
        let throughput_trials = throughput.len();
        let mut failures = Vec::new();

        let mut latency_samples_ms = Vec::with_capacity(latency_trials);
        for outcome in latency {
            match outcome {
                Ok(elapsed) => latency_samples_ms.push(elapsed.as_secs_f64() * 1000.0),
                Err(failure) => failures.push(failure),
            }
        }

        let mut throughput_samples_kib_s = Vec::with_capacity(throughput_trials);
        for outcome in throughput {
            match outcome {
                Ok(rate) if rate > 0.0 => throughput_samples_kib_s.push(rate),
                Ok(_) => failures.push(TrialFailure::ZeroBytes),
                Err(failure) => failures.push(failure),
            }
        }

        let latency_ms = mean(&latency_samples_ms).unwrap_or(LATENCY_SENTINEL);
        let jitter_ms = sample_std_dev(&latency_samples_ms);
        let throughput_kib_s = mean(&throughput_samples_kib_s).unwrap_or(0.0);

        Self {
            endpoint,
            latency_ms,
            jitter_ms,
            throughput_kib_s,
            throughput_mbit_s: kib_s_to_mbit_s(throughput_kib_s),
            latency_ok: latency_samples_ms.len(),
            latency_trials,
            throughput_ok: throughput_samples_kib_s.len(),
            throughput_trials,
            latency_samples_ms,
            throughput_samples_kib_s,
            failures,
        }
    }

    /// 同一原因导致全部测试失败，例如代理客户端没启动
    pub fn failed(
        endpoint: Endpoint,
        latency_trials: usize,
        throughput_trials: usize,
        failure: TrialFailure,
    ) -> Self {
        Self::aggregate(
            endpoint,
            vec![Err(failure.clone()); latency_trials],
            vec![Err(failure); throughput_trials],
        )
    }

    pub fn latency_measured(&self) -> bool {
        self.latency_ok > 0
    }

    pub fn throughput_measured(&self) -> bool {
        self.throughput_ok > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> TrialOutcome<Duration> {
        Ok(Duration::from_millis(v))
    }

    #[test]
    fn jitter_is_zero_below_two_samples() {
        assert_eq!(sample_std_dev(&[]), 0.0);
        assert_eq!(sample_std_dev(&[42.0]), 0.0);

        let result = EndpointResult::aggregate(
            Endpoint::new("1.2.3.4", 443),
            vec![ms(120), Err(TrialFailure::Timeout), Err(TrialFailure::ExitStatus(7))],
            vec![],
        );
        assert_eq!(result.latency_ok, 1);
        assert_eq!(result.jitter_ms, 0.0);
        assert!((result.latency_ms - 120.0).abs() < 1e-9);
    }

    #[test]
    fn jitter_is_sample_standard_deviation() {
        // 2,4,4,4,5,5,7,9：平方和 32，n-1 = 7
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let expected = (32.0f64 / 7.0).sqrt();
        assert!((sample_std_dev(&samples) - expected).abs() < 1e-12);

        let result = EndpointResult::aggregate(
            Endpoint::new("1.2.3.4", 443),
            samples.iter().map(|&v| ms(v as u64)).collect(),
            vec![],
        );
        assert!((result.jitter_ms - expected).abs() < 1e-9);
        assert!((result.latency_ms - 5.0).abs() < 1e-9);
    }

    #[test]
    fn all_failures_yield_sentinels() {
        let result = EndpointResult::failed(
            Endpoint::new("1.2.3.4", 443),
            5,
            2,
            TrialFailure::Startup("exited".into()),
        );
        assert_eq!(result.latency_ms, LATENCY_SENTINEL);
        assert_eq!(result.jitter_ms, 0.0);
        assert_eq!(result.throughput_kib_s, 0.0);
        assert_eq!(result.throughput_mbit_s, 0.0);
        assert_eq!(result.failures.len(), 7);
        assert!(!result.latency_measured());
        assert!(!result.throughput_measured());
    }

    #[test]
    fn one_positive_rate_counts_as_measured() {
        let result = EndpointResult::aggregate(
            Endpoint::new("1.2.3.4", 443),
            vec![],
            vec![Err(TrialFailure::ZeroBytes), Ok(512.0), Ok(0.0)],
        );
        assert!(result.throughput_measured());
        assert_eq!(result.throughput_ok, 1);
        assert_eq!(result.throughput_kib_s, 512.0);
        assert!((result.throughput_mbit_s - 4.194304).abs() < 1e-9);
        assert_eq!(result.failures, vec![TrialFailure::ZeroBytes, TrialFailure::ZeroBytes]);
    }
}
