use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use crate::error::{Error, Result};
use tracing::{info, warn};

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "edgeprobe.toml";

/// 代理客户端参数中代表配置文件路径的占位符
pub const CONFIG_PLACEHOLDER: &str = "{config}";

/// 主配置结构体
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// 节点参数（凭据、域名、路径）
    #[serde(default)]
    pub profile: Profile,
    /// 配置生成设置
    #[serde(default)]
    pub emit: EmitSettings,
    /// 测速设置
    #[serde(default)]
    pub bench: BenchSettings,
}

/// 节点参数，所有端点共用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// VLESS 用户ID
    #[serde(default = "Uuid::nil")]
    pub uuid: Uuid,
    /// TLS SNI 以及 WebSocket Host 头
    #[serde(default = "default_host")]
    pub host: String,
    /// WebSocket 路径
    #[serde(default = "default_path")]
    pub path: String,
    /// TLS 指纹
    #[serde(default = "default_fingerprint")]
    pub fingerprint: String,
    /// 是否跳过证书校验
    #[serde(default)]
    pub allow_insecure: bool,
}

fn default_host() -> String { "example.com".to_string() }
fn default_path() -> String { "/".to_string() }
fn default_fingerprint() -> String { "chrome".to_string() }

impl Default for Profile {
    fn default() -> Self {
        Self {
            uuid: Uuid::nil(),
            host: default_host(),
            path: default_path(),
            fingerprint: default_fingerprint(),
            allow_insecure: false,
        }
    }
}

/// 配置生成设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitSettings {
    /// 输出目录名前缀
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
    /// 输出目录所在的父目录
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_output_prefix() -> String { "configs".to_string() }
fn default_output_dir() -> PathBuf { PathBuf::from(".") }

impl Default for EmitSettings {
    fn default() -> Self {
        Self {
            output_prefix: default_output_prefix(),
            output_dir: default_output_dir(),
        }
    }
}

/// HTTP 探测方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// 调用外部 curl
    #[default]
    Curl,
    /// 进程内 reqwest
    Reqwest,
}

/// 代理客户端启动后的就绪判定方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StartupWait {
    /// 轮询本地端口直到可连接
    Poll {
        #[serde(default = "default_startup_timeout_ms")]
        timeout_ms: u64,
    },
    /// 固定等待一段时间
    Fixed {
        #[serde(default = "default_grace_ms")]
        grace_ms: u64,
    },
}

fn default_startup_timeout_ms() -> u64 { 3000 }
fn default_grace_ms() -> u64 { 1500 }

impl Default for StartupWait {
    fn default() -> Self {
        Self::Poll { timeout_ms: default_startup_timeout_ms() }
    }
}

/// 测速设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchSettings {
    /// 代理客户端可执行文件
    #[serde(default = "default_xray_bin")]
    pub xray_bin: String,
    /// 代理客户端参数，`{config}` 会被替换为配置文件路径
    #[serde(default = "default_xray_args")]
    pub xray_args: Vec<String>,
    /// curl 可执行文件
    #[serde(default = "default_curl_bin")]
    pub curl_bin: String,
    /// HTTP 探测方式
    #[serde(default)]
    pub probe: ProbeKind,
    /// 延迟测试URL（HEAD）
    #[serde(default = "default_latency_url")]
    pub latency_url: String,
    /// 下载测速URL（Range GET）
    #[serde(default = "default_download_url")]
    pub download_url: String,
    /// 延迟测试次数
    #[serde(default = "default_latency_trials")]
    pub latency_trials: usize,
    /// 下载测试次数
    #[serde(default = "default_throughput_trials")]
    pub throughput_trials: usize,
    /// 每次下载测试失败后的最大重试次数
    #[serde(default = "default_throughput_retries")]
    pub throughput_retries: usize,
    /// 下载字节上限
    #[serde(default = "default_download_bytes")]
    pub download_bytes: u64,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 同时测试的端点数
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 本地入站端口起点，未设置时由系统分配
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port_base: Option<u16>,
    /// 表格导出路径
    #[serde(default = "default_csv_path")]
    pub csv_path: PathBuf,
    /// 原始 JSON 导出路径
    #[serde(default = "default_json_path")]
    pub json_path: PathBuf,
    /// 就绪判定
    #[serde(default)]
    pub startup: StartupWait,
}

fn default_xray_bin() -> String { "xray".to_string() }
fn default_xray_args() -> Vec<String> {
    vec!["run".to_string(), "-c".to_string(), CONFIG_PLACEHOLDER.to_string()]
}
fn default_curl_bin() -> String { "curl".to_string() }
fn default_latency_url() -> String { "https://www.gstatic.com/generate_204".to_string() }
fn default_download_url() -> String {
    "https://speed.cloudflare.com/__down?bytes=5242880".to_string()
}
fn default_latency_trials() -> usize { 5 }
fn default_throughput_trials() -> usize { 2 }
fn default_throughput_retries() -> usize { 2 }
fn default_download_bytes() -> u64 { 5 * 1024 * 1024 }
fn default_request_timeout_secs() -> u64 { 10 }
fn default_max_concurrency() -> usize { 4 }
fn default_csv_path() -> PathBuf { PathBuf::from("bench_results.csv") }
fn default_json_path() -> PathBuf { PathBuf::from("bench_results.json") }

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            xray_bin: default_xray_bin(),
            xray_args: default_xray_args(),
            curl_bin: default_curl_bin(),
            probe: ProbeKind::default(),
            latency_url: default_latency_url(),
            download_url: default_download_url(),
            latency_trials: default_latency_trials(),
            throughput_trials: default_throughput_trials(),
            throughput_retries: default_throughput_retries(),
            download_bytes: default_download_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            local_port_base: None,
            csv_path: default_csv_path(),
            json_path: default_json_path(),
            startup: StartupWait::default(),
        }
    }
}

impl Settings {
    /// 加载配置：显式路径必须可读；默认路径不存在时使用默认配置
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    info!("未找到 {}，使用默认配置", DEFAULT_CONFIG_FILE);
                    Ok(Self::default())
                }
            }
        }
    }

    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            warn!("无法读取配置文件: {}", e);
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// 解析 TOML 文本，格式错误时退回到逐段宽松解析
    pub fn from_toml_str(content: &str) -> Result<Self> {
        match toml::from_str::<Self>(content) {
            Ok(settings) => {
                info!("成功读取配置");
                Ok(settings)
            }
            Err(e) => {
                warn!("配置文件格式错误: {}", e);
                warn!("尝试使用更宽松的解析方式...");
                Self::parse_with_fallbacks(content)
            }
        }
    }

    /// 使用更宽松的解析方式，某一段解析失败时该段使用默认值
    fn parse_with_fallbacks(content: &str) -> Result<Self> {
        let table = content
            .parse::<toml::Table>()
            .map_err(|e| Error::Configuration(format!("invalid TOML: {}", e)))?;

        Ok(Self {
            profile: section_or_default(&table, "profile"),
            emit: section_or_default(&table, "emit"),
            bench: section_or_default(&table, "bench"),
        })
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 检查取值是否能用于一次运行
    pub fn validate(&self) -> Result<()> {
        let bench = &self.bench;
        if bench.max_concurrency == 0 {
            return Err(Error::Configuration("max_concurrency must be at least 1".to_string()));
        }
        if bench.download_bytes == 0 {
            return Err(Error::Configuration("download_bytes must be at least 1".to_string()));
        }
        if bench.request_timeout_secs == 0 {
            return Err(Error::Configuration("request_timeout_secs must be at least 1".to_string()));
        }
        if self.emit.output_prefix.trim().is_empty() {
            return Err(Error::Configuration("output_prefix must not be empty".to_string()));
        }
        if !bench.xray_args.iter().any(|a| a.contains(CONFIG_PLACEHOLDER)) {
            warn!("xray_args 中没有 {} 占位符，代理客户端将拿不到生成的配置", CONFIG_PLACEHOLDER);
        }
        if self.profile.uuid.is_nil() {
            warn!("profile.uuid 未设置，正在使用全零UUID");
        }
        Ok(())
    }
}

fn section_or_default<T>(table: &toml::Table, key: &str) -> T
where
    T: Default + for<'de> Deserialize<'de>,
{
    match table.get(key) {
        Some(value) => match T::deserialize(value.clone()) {
            Ok(section) => section,
            Err(e) => {
                warn!("[{}] 解析失败，使用默认值: {}", key, e);
                T::default()
            }
        },
        None => T::default(),
    }
}
