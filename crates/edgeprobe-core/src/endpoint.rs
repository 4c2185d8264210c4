use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::net::Ipv6Addr;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};
use crate::error::{Error, Result};

/// 候选端点：地址 + 端口
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// IP 或域名，IPv6 不带方括号
    pub address: String,
    /// 端口
    pub port: u16,
}

/// 单行解析失败的原因
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineError {
    #[error("expected `address:port` or `address port`")]
    Shape,
    #[error("empty address")]
    EmptyAddress,
    #[error("invalid port `{0}`")]
    Port(String),
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self { address: address.into(), port }
    }

    /// 解析一行，支持 `addr:port`、`addr port` 和 `[v6]:port`
    pub fn parse(line: &str) -> std::result::Result<Self, LineError> {
        let line = line.trim();

        let (address, port) = if let Some(rest) = line.strip_prefix('[') {
            let (address, tail) = rest.split_once(']').ok_or(LineError::Shape)?;
            let port = tail.strip_prefix(':').ok_or(LineError::Shape)?;
            if address.parse::<Ipv6Addr>().is_err() {
                return Err(LineError::Shape);
            }
            (address, port)
        } else {
            match line.matches(':').count() {
                1 => {
                    let (address, port) = line.split_once(':').ok_or(LineError::Shape)?;
                    (address.trim(), port.trim())
                }
                0 => {
                    let mut tokens = line.split_whitespace();
                    match (tokens.next(), tokens.next(), tokens.next()) {
                        (Some(address), Some(port), None) => (address, port),
                        _ => return Err(LineError::Shape),
                    }
                }
                _ => return Err(LineError::Shape),
            }
        };

        if address.is_empty() {
            return Err(LineError::EmptyAddress);
        }
        if address.chars().any(char::is_whitespace) {
            return Err(LineError::Shape);
        }
        let port = match port.parse::<u16>() {
            Ok(p) if p != 0 => p,
            _ => return Err(LineError::Port(port.to_string())),
        };

        Ok(Self::new(address, port))
    }

    pub fn is_ipv6(&self) -> bool {
        self.address.contains(':')
    }

    /// 用于 URI 的主机部分，IPv6 加方括号
    pub fn host_for_uri(&self) -> String {
        if self.is_ipv6() {
            format!("[{}]", self.address)
        } else {
            self.address.clone()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_for_uri(), self.port)
    }
}

impl FromStr for Endpoint {
    type Err = LineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// 被拒绝的输入行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 行号，从1开始
    pub line_no: usize,
    pub content: String,
    pub reason: LineError,
}

/// 解析后的端点列表
#[derive(Debug, Clone, Default)]
pub struct EndpointList {
    /// 有效端点，保持输入顺序，不去重
    pub endpoints: Vec<Endpoint>,
    /// 格式错误的行
    pub rejected: Vec<RejectedLine>,
    /// 空行和注释行数量
    pub skipped: usize,
    /// 输入总行数
    pub total: usize,
}

impl EndpointList {
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }
}

/// 逐行解析，错误行记录并跳过，不中止
pub fn parse_lines<I, S>(lines: I) -> EndpointList
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut list = EndpointList::default();

    for (idx, line) in lines.into_iter().enumerate() {
        list.total += 1;
        let trimmed = line.as_ref().trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            list.skipped += 1;
            continue;
        }

        match Endpoint::parse(trimmed) {
            Ok(endpoint) => {
                debug!("第 {} 行: {}", idx + 1, endpoint);
                list.endpoints.push(endpoint);
            }
            Err(reason) => {
                warn!("跳过第 {} 行 `{}`: {}", idx + 1, trimmed, reason);
                list.rejected.push(RejectedLine {
                    line_no: idx + 1,
                    content: trimmed.to_string(),
                    reason,
                });
            }
        }
    }

    list
}

/// 读取端点列表文件，文件不可读是唯一的致命错误
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<EndpointList> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| Error::Input {
        path: path.to_path_buf(),
        source,
    })?;

    let list = parse_lines(content.trim_start_matches('\u{feff}').lines());
    info!(
        "读取 {}: {} 个端点, {} 行格式错误, {} 行跳过",
        path.display(),
        list.endpoints.len(),
        list.rejected.len(),
        list.skipped
    );
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_and_space_forms_agree() {
        let a = Endpoint::parse("1.2.3.4:443").unwrap();
        let b = Endpoint::parse("1.2.3.4 443").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Endpoint::new("1.2.3.4", 443));
    }

    #[test]
    fn rejoining_reproduces_trimmed_tokens() {
        let cases = [
            ("104.16.1.2:443", ":"),
            ("  172.67.0.9:2053  ", ":"),
            ("cdn.example.net:8443", ":"),
            ("104.16.1.2 443", " "),
            ("\t162.159.36.1\t\t2096 ", " "),
        ];
        for (line, sep) in cases {
            let endpoint = Endpoint::parse(line).unwrap();
            let tokens: Vec<&str> = if sep == ":" {
                line.trim().split(':').collect()
            } else {
                line.split_whitespace().collect()
            };
            assert_eq!(
                format!("{}{}{}", endpoint.address, sep, endpoint.port),
                tokens.join(sep),
                "line {:?}",
                line
            );
        }
    }

    #[test]
    fn bracketed_ipv6_is_accepted() {
        let endpoint = Endpoint::parse("[2606:4700::1]:443").unwrap();
        assert_eq!(endpoint.address, "2606:4700::1");
        assert_eq!(endpoint.to_string(), "[2606:4700::1]:443");
        assert!(Endpoint::parse("[not-v6]:443").is_err());
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert_eq!(Endpoint::parse("1.2.3.4"), Err(LineError::Shape));
        assert_eq!(Endpoint::parse("1.2.3.4 443 extra"), Err(LineError::Shape));
        assert_eq!(Endpoint::parse("2606:4700::1:443"), Err(LineError::Shape));
        assert_eq!(Endpoint::parse(":443"), Err(LineError::EmptyAddress));
        assert_eq!(Endpoint::parse("1.2.3.4:http"), Err(LineError::Port("http".into())));
        assert_eq!(Endpoint::parse("1.2.3.4:70000"), Err(LineError::Port("70000".into())));
        assert_eq!(Endpoint::parse("1.2.3.4:0"), Err(LineError::Port("0".into())));
    }

    #[test]
    fn list_counts_add_up() {
        let input = [
            "# cloudflare ranges",
            "104.16.1.2:443",
            "",
            "garbage",
            "172.67.0.9 2053",
            "   ",
            "#1.1.1.1:443",
            "1.2.3.4:99999",
            "104.16.1.2:443",
        ];
        let list = parse_lines(input);

        assert_eq!(list.total, input.len());
        assert_eq!(list.skipped, 4);
        assert_eq!(list.endpoints.len(), 3);
        assert_eq!(list.rejected.len(), list.total - list.endpoints.len() - list.skipped);
        assert_eq!(list.rejected[0].line_no, 4);
        assert_eq!(list.rejected[1].line_no, 8);
        assert!(list.endpoints.iter().all(|e| e.address != "1.1.1.1"));
        // 重复行各自保留
        assert_eq!(list.endpoints[0], list.endpoints[2]);
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let err = load_from_file("/no/such/ips.txt").unwrap_err();
        assert!(matches!(err, Error::Input { .. }));
    }

    #[test]
    fn file_with_bom_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ips.txt");
        fs::write(&path, "\u{feff}5.6.7.8:8080\n# done\n").unwrap();

        let list = load_from_file(&path).unwrap();
        assert_eq!(list.endpoints, vec![Endpoint::new("5.6.7.8", 8080)]);
        assert_eq!(list.skipped, 1);
    }
}
