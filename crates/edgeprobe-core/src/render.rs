//! 配置渲染：分享链接、Xray 出站 JSON、Clash YAML
//!
//! 渲染函数都是纯函数，只依赖端点和 [`Profile`]。

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use url::form_urlencoded::byte_serialize;
use crate::config::Profile;
use crate::endpoint::Endpoint;
use crate::error::Result;

pub const LINKS_FILE: &str = "links.txt";
pub const JSON_FILE: &str = "configs.json";
pub const CLASH_FILE: &str = "clash.yaml";
pub const README_FILE: &str = "README.txt";

/// Clash 中包含所有节点的手动选择组
pub const CLASH_GROUP_NAME: &str = "edgeprobe";

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

/// 生成 `vless://` 分享链接，片段标签即端点本身
pub fn share_link(endpoint: &Endpoint, profile: &Profile) -> String {
    let mut link = format!(
        "vless://{}@{}?encryption=none&security=tls&sni={}&fp={}&type=ws&host={}&path={}",
        profile.uuid,
        endpoint,
        encode(&profile.host),
        encode(&profile.fingerprint),
        encode(&profile.host),
        encode(&profile.path),
    );
    if profile.allow_insecure {
        link.push_str("&allowInsecure=1");
    }
    link.push('#');
    link.push_str(&endpoint.to_string());
    link
}

/// Xray 出站描述，测速时也直接用它生成代理客户端配置
pub fn xray_outbound(endpoint: &Endpoint, profile: &Profile) -> Value {
    json!({
        "tag": endpoint.to_string(),
        "protocol": "vless",
        "settings": {
            "vnext": [{
                "address": endpoint.address,
                "port": endpoint.port,
                "users": [{
                    "id": profile.uuid.to_string(),
                    "encryption": "none"
                }]
            }]
        },
        "streamSettings": {
            "network": "ws",
            "security": "tls",
            "tlsSettings": {
                "serverName": profile.host,
                "fingerprint": profile.fingerprint,
                "allowInsecure": profile.allow_insecure
            },
            "wsSettings": {
                "path": profile.path,
                "headers": { "Host": profile.host }
            }
        }
    })
}

/// Clash 代理条目
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClashProxy {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub server: String,
    pub port: u16,
    pub uuid: String,
    pub udp: bool,
    pub tls: bool,
    pub servername: String,
    pub skip_cert_verify: bool,
    pub client_fingerprint: String,
    pub network: String,
    pub ws_opts: WsOpts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsOpts {
    pub path: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClashGroup {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub proxies: Vec<String>,
}

/// clash.yaml 文档
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClashDocument {
    pub proxies: Vec<ClashProxy>,
    #[serde(rename = "proxy-groups")]
    pub proxy_groups: Vec<ClashGroup>,
}

pub fn clash_proxy(endpoint: &Endpoint, profile: &Profile) -> ClashProxy {
    let mut headers = BTreeMap::new();
    headers.insert("Host".to_string(), profile.host.clone());

    ClashProxy {
        name: endpoint.to_string(),
        kind: "vless".to_string(),
        server: endpoint.address.clone(),
        port: endpoint.port,
        uuid: profile.uuid.to_string(),
        udp: true,
        tls: true,
        servername: profile.host.clone(),
        skip_cert_verify: profile.allow_insecure,
        client_fingerprint: profile.fingerprint.clone(),
        network: "ws".to_string(),
        ws_opts: WsOpts {
            path: profile.path.clone(),
            headers,
        },
    }
}

/// 一次生成的全部产物
#[derive(Debug, Clone)]
pub struct OutputBundle {
    pub links: Vec<String>,
    pub outbounds: Vec<Value>,
    pub clash: ClashDocument,
    profile: Profile,
    rejected_lines: usize,
}

impl OutputBundle {
    pub fn render(endpoints: &[Endpoint], profile: &Profile) -> Self {
        let proxies: Vec<ClashProxy> = endpoints.iter().map(|e| clash_proxy(e, profile)).collect();
        let group = ClashGroup {
            name: CLASH_GROUP_NAME.to_string(),
            kind: "select".to_string(),
            proxies: proxies.iter().map(|p| p.name.clone()).collect(),
        };

        Self {
            links: endpoints.iter().map(|e| share_link(e, profile)).collect(),
            outbounds: endpoints.iter().map(|e| xray_outbound(e, profile)).collect(),
            clash: ClashDocument {
                proxies,
                proxy_groups: vec![group],
            },
            profile: profile.clone(),
            rejected_lines: 0,
        }
    }

    /// 记录输入中被拒绝的行数，写入 README
    pub fn with_rejected_lines(mut self, rejected: usize) -> Self {
        self.rejected_lines = rejected;
        self
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// 输出目录名：`<prefix>_<YYYYmmdd_HHMMSS>`
    pub fn directory_name(prefix: &str, now: &DateTime<Local>) -> String {
        format!("{}_{}", prefix, now.format("%Y%m%d_%H%M%S"))
    }

    pub fn readme(&self, now: &DateTime<Local>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "edgeprobe 配置输出");
        let _ = writeln!(out, "生成时间: {}", now.format("%Y-%m-%d %H:%M:%S %:z"));
        let _ = writeln!(out);
        let _ = writeln!(out, "节点数量: {}", self.len());
        let _ = writeln!(out, "被拒绝的输入行: {}", self.rejected_lines);
        let _ = writeln!(out, "Host/SNI: {}", self.profile.host);
        let _ = writeln!(out, "WS 路径: {}", self.profile.path);
        let _ = writeln!(out, "TLS 指纹: {}", self.profile.fingerprint);
        let _ = writeln!(out);
        let _ = writeln!(out, "文件:");
        let _ = writeln!(out, "  {:<12} 每行一个 vless:// 分享链接", LINKS_FILE);
        let _ = writeln!(out, "  {:<12} Xray 出站配置数组", JSON_FILE);
        let _ = writeln!(out, "  {:<12} Clash proxies 与选择组 `{}`", CLASH_FILE, CLASH_GROUP_NAME);
        let _ = writeln!(out, "  {:<12} 本说明", README_FILE);
        out
    }

    /// 写入 `<out_root>/<prefix>_<时间戳>/`，目录已存在时直接复用
    pub fn write(&self, out_root: &Path, prefix: &str, now: &DateTime<Local>) -> Result<PathBuf> {
        let dir = out_root.join(Self::directory_name(prefix, now));
        fs::create_dir_all(&dir)?;

        let mut links = self.links.join("\n");
        if !links.is_empty() {
            links.push('\n');
        }
        fs::write(dir.join(LINKS_FILE), links)?;
        fs::write(dir.join(JSON_FILE), serde_json::to_string_pretty(&self.outbounds)?)?;
        fs::write(dir.join(CLASH_FILE), serde_yaml::to_string(&self.clash)?)?;
        fs::write(dir.join(README_FILE), self.readme(now))?;

        info!("已写入 {} 个节点到 {}", self.len(), dir.display());
        Ok(dir)
    }
}
