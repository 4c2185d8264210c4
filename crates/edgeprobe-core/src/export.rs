use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;
use crate::error::Result;
use crate::stats::EndpointResult;

/// 表头，与 [`Row`] 的字段顺序一致
const HEADER: [&str; 11] = [
    "rank",
    "address",
    "port",
    "latency_ms",
    "jitter_ms",
    "throughput_kib_s",
    "throughput_mbit_s",
    "latency_ok",
    "latency_trials",
    "throughput_ok",
    "throughput_trials",
];

/// CSV 中的一行
#[derive(Debug, Serialize)]
struct Row<'a> {
    rank: usize,
    address: &'a str,
    port: u16,
    latency_ms: f64,
    jitter_ms: f64,
    throughput_kib_s: f64,
    throughput_mbit_s: f64,
    latency_ok: usize,
    latency_trials: usize,
    throughput_ok: usize,
    throughput_trials: usize,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// 写出排名表格，`ranked` 应已排序；没有结果时只有表头
pub fn write_csv<P: AsRef<Path>>(path: P, ranked: &[EndpointResult]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(HEADER)?;
    for (idx, r) in ranked.iter().enumerate() {
        writer.serialize(Row {
            rank: idx + 1,
            address: &r.endpoint.address,
            port: r.endpoint.port,
            latency_ms: round2(r.latency_ms),
            jitter_ms: round2(r.jitter_ms),
            throughput_kib_s: round2(r.throughput_kib_s),
            throughput_mbit_s: round2(r.throughput_mbit_s),
            latency_ok: r.latency_ok,
            latency_trials: r.latency_trials,
            throughput_ok: r.throughput_ok,
            throughput_trials: r.throughput_trials,
        })?;
    }
    writer.flush()?;
    info!("表格已写入 {}", path.display());
    Ok(())
}

/// 写出包含原始样本的 JSON 数组
pub fn write_json<P: AsRef<Path>>(path: P, ranked: &[EndpointResult]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, ranked)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    info!("原始结果已写入 {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::probe::TrialFailure;
    use std::time::Duration;

    fn sample() -> Vec<EndpointResult> {
        vec![
            EndpointResult::aggregate(
                Endpoint::new("5.6.7.8", 8080),
                vec![Ok(Duration::from_millis(100)), Ok(Duration::from_millis(140))],
                vec![Ok(2048.0)],
            ),
            EndpointResult::failed(Endpoint::new("1.2.3.4", 443), 2, 1, TrialFailure::Timeout),
        ]
    }

    #[test]
    fn csv_has_header_and_ranked_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_csv(&path, &sample()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "rank,address,port,latency_ms,jitter_ms,throughput_kib_s,throughput_mbit_s,latency_ok,latency_trials,throughput_ok,throughput_trials"
        );
        assert!(lines[1].starts_with("1,5.6.7.8,8080,120.0,28.28,2048.0,16.78,2,2,1,1"));
        assert!(lines[2].starts_with("2,1.2.3.4,443,-1.0,0.0,0.0,0.0,0,2,0,1"));
    }

    #[test]
    fn empty_results_still_get_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        write_csv(&path, &[]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert_eq!(text.lines().next().unwrap(), HEADER.join(","));
    }

    #[test]
    fn json_keeps_raw_samples_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json(&path, &sample()).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let rows = value.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["address"], "5.6.7.8");
        assert_eq!(rows[0]["latency_samples_ms"].as_array().unwrap().len(), 2);
        assert_eq!(rows[1]["latency_ms"], -1.0);
        assert_eq!(rows[1]["failures"][0]["kind"], "timeout");
    }
}
