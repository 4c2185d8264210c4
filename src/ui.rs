//! UI相关功能模块
//!
//! 横幅、进度条和结果表格

use colored::*;
use edgeprobe_core::{EndpointList, EndpointResult, Winners};
use indicatif::{ProgressBar, ProgressStyle};

/// 初始化UI；终端不支持颜色或设置了 NO_COLOR 时关闭彩色输出
pub fn init_ui() {
    if !console::colors_enabled() || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }
}

/// 创建一个标准格式的进度条，stderr 不是终端时返回隐藏的进度条
pub fn create_progress_bar(len: u64) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// 打印横幅
pub fn print_banner(version: &str) {
    println!("{}\n{}",
        r#"
╔═╗╔╦╗╔═╗╔═╗╔═╗╦═╗╔═╗╔╗ ╔═╗
║╣  ║║║ ╦║╣ ╠═╝╠╦╝║ ║╠╩╗║╣
╚═╝═╩╝╚═╝╚═╝╩  ╩╚═╚═╝╚═╝╚═╝
        "#.cyan().bold(),
        format!("Version: {}", version).yellow()
    );
}

/// 打印成功消息
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// 打印错误消息
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// 打印警告消息
pub fn print_warning(msg: &str) {
    println!("{} {}", "!".yellow().bold(), msg);
}

/// 打印信息消息
pub fn print_info(msg: &str) {
    println!("{} {}", "i".blue().bold(), msg);
}

/// 输入解析摘要
pub fn print_input_summary(list: &EndpointList) {
    print_info(&format!(
        "共 {} 行: {} 个端点, {} 行格式错误, {} 行空行或注释",
        list.total,
        list.len(),
        list.rejected.len(),
        list.skipped
    ));
    for line in &list.rejected {
        print_warning(&format!("第 {} 行 `{}`: {}", line.line_no, line.content, line.reason));
    }
}

/// 延迟着色，未测得时显示 `-`
pub fn format_latency(result: &EndpointResult) -> ColoredString {
    if !result.latency_measured() {
        return "-".red();
    }
    let text = format!("{:.1}", result.latency_ms);
    match result.latency_ms {
        ms if ms <= 100.0 => text.green(),
        ms if ms <= 300.0 => text.yellow(),
        _ => text.red(),
    }
}

fn format_rate(result: &EndpointResult) -> ColoredString {
    if result.throughput_measured() {
        format!("{:.1}", result.throughput_kib_s).cyan()
    } else {
        "0".red()
    }
}

/// 打印排名表格，`ranked` 应已排序
pub fn print_results(ranked: &[EndpointResult]) {
    println!(
        "\n{:>4}  {:<28} {:>10} {:>10} {:>12} {:>10} {:>7} {:>7}",
        "#".bold(),
        "端点".bold(),
        "延迟ms".bold(),
        "抖动ms".bold(),
        "KiB/s".bold(),
        "Mbit/s".bold(),
        "延迟",
        "下载"
    );
    for (idx, r) in ranked.iter().enumerate() {
        println!(
            "{:>4}  {:<28} {:>10} {:>10.1} {:>12} {:>10.2} {:>7} {:>7}",
            (idx + 1).to_string().blue().bold(),
            r.endpoint.to_string().cyan(),
            format_latency(r),
            r.jitter_ms,
            format_rate(r),
            r.throughput_mbit_s,
            format!("{}/{}", r.latency_ok, r.latency_trials),
            format!("{}/{}", r.throughput_ok, r.throughput_trials),
        );
    }
    println!();
}

/// 打印最低延迟与最高速率端点
pub fn print_winners(winners: &Winners<'_>) {
    match winners.lowest_latency {
        Some(r) => print_success(&format!(
            "最低延迟: {} ({:.1} ms, 抖动 {:.1} ms)",
            r.endpoint.to_string().cyan(),
            r.latency_ms,
            r.jitter_ms
        )),
        None => print_warning("没有端点测得延迟"),
    }
    match winners.highest_throughput {
        Some(r) => print_success(&format!(
            "最高速率: {} ({:.1} KiB/s, {:.2} Mbit/s)",
            r.endpoint.to_string().cyan(),
            r.throughput_kib_s,
            r.throughput_mbit_s
        )),
        None => print_warning("没有端点完成下载"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeprobe_core::{Endpoint, TrialFailure};
    use std::time::Duration;

    #[test]
    fn latency_column_marks_unmeasured_endpoints() {
        colored::control::set_override(false);
        let dead = EndpointResult::failed(Endpoint::new("1.2.3.4", 443), 3, 1, TrialFailure::Startup("exited early".to_string()));
        assert_eq!(format_latency(&dead).to_string(), "-");

        let alive = EndpointResult::aggregate(
            Endpoint::new("5.6.7.8", 8080),
            vec![Ok(Duration::from_millis(42))],
            vec![Ok(512.0)],
        );
        assert_eq!(format_latency(&alive).to_string(), "42.0");
        assert_eq!(format_rate(&alive).to_string(), "512.0");
    }
}
