//! edgeprobe CLI - command-line definitions for the edgeprobe tools
//!
//! Parsing lives here; the flags are folded into a [`Settings`] value that
//! the binary hands to the core library unchanged.

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use edgeprobe_core::config::DEFAULT_CONFIG_FILE;
use edgeprobe_core::{ProbeKind, Profile, Settings, StartupWait};
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

/// 为 CDN 边缘端点生成节点配置，并通过本地代理客户端测速
#[derive(Debug, Clone, Parser)]
#[command(name = "edgeprobe", version, about, long_about = None)]
pub struct Cli {
    /// 配置文件（默认读取 ./edgeprobe.toml，不存在则使用内置默认值）
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// 输出更多日志，可重复
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// 只输出警告和错误日志
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// 不显示横幅
    #[arg(long, global = true)]
    pub no_banner: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// 日志级别
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// 配置文件路径，未指定时为当前目录下的默认文件
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// 读取配置文件，叠加子命令参数并校验
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())
            .with_context(|| format!("failed to load configuration from {}", self.config_path().display()))?;

        match &self.command {
            Command::Emit(args) => args.apply(&mut settings),
            Command::Bench(args) => args.apply(&mut settings),
            Command::Init(_) => {}
        }

        settings.validate().context("invalid configuration")?;
        debug!("生效配置: {:?}", settings);
        Ok(settings)
    }
}

/// CLI命令枚举
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// 把端点列表渲染为分享链接、JSON 和 Clash YAML
    Emit(EmitArgs),
    /// 逐个端点测量延迟与下载速率并排名
    Bench(BenchArgs),
    /// 写出默认配置文件
    Init(InitArgs),
}

/// 节点参数覆盖
#[derive(Debug, Clone, Default, Args)]
pub struct ProfileArgs {
    /// VLESS 用户ID
    #[arg(long)]
    pub uuid: Option<Uuid>,
    /// TLS SNI / WebSocket Host
    #[arg(long)]
    pub host: Option<String>,
    /// WebSocket 路径
    #[arg(long)]
    pub path: Option<String>,
    /// TLS 指纹
    #[arg(long)]
    pub fingerprint: Option<String>,
}

impl ProfileArgs {
    pub fn apply(&self, profile: &mut Profile) {
        if let Some(uuid) = self.uuid {
            profile.uuid = uuid;
        }
        if let Some(host) = &self.host {
            profile.host = host.clone();
        }
        if let Some(path) = &self.path {
            profile.path = path.clone();
        }
        if let Some(fingerprint) = &self.fingerprint {
            profile.fingerprint = fingerprint.clone();
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct EmitArgs {
    /// 端点列表文件，每行 `ip:port` 或 `ip port`
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,
    /// 输出目录所在的父目录
    #[arg(short, long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,
    /// 输出目录名前缀
    #[arg(long)]
    pub prefix: Option<String>,
    #[command(flatten)]
    pub profile: ProfileArgs,
}

impl EmitArgs {
    pub fn apply(&self, settings: &mut Settings) {
        self.profile.apply(&mut settings.profile);
        if let Some(dir) = &self.out_dir {
            settings.emit.output_dir = dir.clone();
        }
        if let Some(prefix) = &self.prefix {
            settings.emit.output_prefix = prefix.clone();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProbeArg {
    Curl,
    Reqwest,
}

impl From<ProbeArg> for ProbeKind {
    fn from(arg: ProbeArg) -> Self {
        match arg {
            ProbeArg::Curl => ProbeKind::Curl,
            ProbeArg::Reqwest => ProbeKind::Reqwest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WaitArg {
    /// 轮询本地端口直到可连接
    Poll,
    /// 固定等待
    Fixed,
}

#[derive(Debug, Clone, Args)]
pub struct BenchArgs {
    /// 端点列表文件，每行 `ip:port` 或 `ip port`
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,
    /// 每个端点的延迟测试次数
    #[arg(short = 'n', long)]
    pub latency_trials: Option<usize>,
    /// 每个端点的下载测试次数
    #[arg(short = 'm', long)]
    pub throughput_trials: Option<usize>,
    /// 下载失败后的重试次数
    #[arg(long)]
    pub retries: Option<usize>,
    /// 同时测试的端点数
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,
    /// 代理客户端可执行文件
    #[arg(long, value_name = "PATH")]
    pub xray: Option<String>,
    /// curl 可执行文件
    #[arg(long, value_name = "PATH")]
    pub curl: Option<String>,
    /// HTTP 探测方式
    #[arg(long, value_enum)]
    pub probe: Option<ProbeArg>,
    /// 代理客户端就绪判定方式
    #[arg(long, value_enum)]
    pub wait: Option<WaitArg>,
    /// 本地入站端口起点（默认由系统分配）
    #[arg(long, value_name = "PORT")]
    pub port_base: Option<u16>,
    /// 表格输出路径
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,
    /// 原始 JSON 输出路径
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,
    #[command(flatten)]
    pub profile: ProfileArgs,
}

impl BenchArgs {
    pub fn apply(&self, settings: &mut Settings) {
        self.profile.apply(&mut settings.profile);
        let bench = &mut settings.bench;
        if let Some(n) = self.latency_trials {
            bench.latency_trials = n;
        }
        if let Some(m) = self.throughput_trials {
            bench.throughput_trials = m;
        }
        if let Some(r) = self.retries {
            bench.throughput_retries = r;
        }
        if let Some(c) = self.concurrency {
            bench.max_concurrency = c;
        }
        if let Some(xray) = &self.xray {
            bench.xray_bin = xray.clone();
        }
        if let Some(curl) = &self.curl {
            bench.curl_bin = curl.clone();
        }
        if let Some(probe) = self.probe {
            bench.probe = probe.into();
        }
        if let Some(base) = self.port_base {
            bench.local_port_base = Some(base);
        }
        if let Some(csv) = &self.csv {
            bench.csv_path = csv.clone();
        }
        if let Some(json) = &self.json {
            bench.json_path = json.clone();
        }
        // 切换模式时使用该模式的默认时长，模式不变则保留配置文件中的值
        match (self.wait, bench.startup) {
            (Some(WaitArg::Poll), StartupWait::Fixed { .. }) => bench.startup = StartupWait::default(),
            (Some(WaitArg::Fixed), StartupWait::Poll { .. }) => {
                bench.startup = StartupWait::Fixed { grace_ms: 1500 }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct InitArgs {
    /// 覆盖已存在的文件
    #[arg(long)]
    pub force: bool,
}
