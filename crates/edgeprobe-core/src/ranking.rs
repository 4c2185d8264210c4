use crate::stats::EndpointResult;

/// 按下载速率从高到低排序，速率相同保持原顺序
pub fn rank(mut results: Vec<EndpointResult>) -> Vec<EndpointResult> {
    results.sort_by(|a, b| b.throughput_kib_s.total_cmp(&a.throughput_kib_s));
    results
}

/// 延迟最低与速率最高的端点
#[derive(Debug, Clone, Copy, Default)]
pub struct Winners<'a> {
    /// 忽略没有成功延迟样本的端点
    pub lowest_latency: Option<&'a EndpointResult>,
    /// 忽略速率为 0 的端点
    pub highest_throughput: Option<&'a EndpointResult>,
}

impl<'a> Winners<'a> {
    /// 并列时取靠前的一个
    pub fn from_results(results: &'a [EndpointResult]) -> Self {
        let lowest_latency = results
            .iter()
            .filter(|r| r.latency_measured() && r.latency_ms >= 0.0)
            .min_by(|a, b| a.latency_ms.total_cmp(&b.latency_ms));

        let highest_throughput = results
            .iter()
            .filter(|r| r.throughput_kib_s > 0.0)
            .min_by(|a, b| b.throughput_kib_s.total_cmp(&a.throughput_kib_s));

        Self { lowest_latency, highest_throughput }
    }
}
