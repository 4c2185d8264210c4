use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use edgeprobe::ui;
use edgeprobe::{Cli, Command};
use edgeprobe_core::{endpoint, export};
use edgeprobe_core::{cancellation, rank, Benchmarker, OutputBundle, Settings, Winners};
use std::path::Path;
use tracing::{debug, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // 初始化日志
    edgeprobe_core::init_logger(cli.log_level());
    ui::init_ui();

    if !cli.no_banner && !cli.quiet {
        ui::print_banner(VERSION);
    }

    if let Err(e) = run(&cli).await {
        ui::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Init(args) => init(&cli.config_path(), args.force),
        Command::Emit(args) => {
            let settings = cli.settings()?;
            emit(&settings, &args.input)
        }
        Command::Bench(args) => {
            let settings = cli.settings()?;
            bench(&settings, &args.input).await
        }
    }
}

/// 写出默认配置
fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, pass --force to overwrite it", path.display());
    }
    Settings::default()
        .save_to_file(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    ui::print_success(&format!("已写入默认配置 {}", path.display()));
    Ok(())
}

/// 生成分享链接、JSON 和 Clash 配置
fn emit(settings: &Settings, input: &Path) -> Result<()> {
    let list = endpoint::load_from_file(input)?;
    ui::print_input_summary(&list);
    if list.is_empty() {
        ui::print_warning("没有有效端点，输出文件将为空");
    }

    let bundle = OutputBundle::render(&list.endpoints, &settings.profile)
        .with_rejected_lines(list.rejected.len());
    let dir = bundle
        .write(&settings.emit.output_dir, &settings.emit.output_prefix, &Local::now())
        .context("failed to write output files")?;

    ui::print_success(&format!("已生成 {} 个节点: {}", bundle.len(), dir.display()));
    Ok(())
}

/// 测速、排名并导出结果
async fn bench(settings: &Settings, input: &Path) -> Result<()> {
    let list = endpoint::load_from_file(input)?;
    ui::print_input_summary(&list);
    if list.is_empty() {
        ui::print_warning("没有有效端点，只会写出空的结果文件");
    }

    let (handle, cancel) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消剩余测试...");
            handle.cancel();
        }
    });

    let benchmarker = Benchmarker::from_settings(settings, cancel);
    ui::print_info(&format!(
        "探测器: {}, 并发: {}, 延迟 {} 次, 下载 {} 次",
        benchmarker.probe_name(),
        settings.bench.max_concurrency,
        settings.bench.latency_trials,
        settings.bench.throughput_trials
    ));

    let pb = ui::create_progress_bar(list.len() as u64);
    let results = benchmarker
        .run_all(&list.endpoints, |result| {
            debug!("{} 完成", result.endpoint);
            pb.set_message(result.endpoint.to_string());
            pb.inc(1);
        })
        .await;
    pb.finish_and_clear();

    let ranked = rank(results);
    ui::print_results(&ranked);
    ui::print_winners(&Winners::from_results(&ranked));

    let bench = &settings.bench;
    export::write_csv(&bench.csv_path, &ranked)
        .with_context(|| format!("failed to write {}", bench.csv_path.display()))?;
    export::write_json(&bench.json_path, &ranked)
        .with_context(|| format!("failed to write {}", bench.json_path.display()))?;
    ui::print_success(&format!(
        "结果已写入 {} 和 {}",
        bench.csv_path.display(),
        bench.json_path.display()
    ));
    Ok(())
}
