//! 工具函数模块

use std::net::UdpSocket;
use std::sync::OnceLock;

use tonic::metadata::MetadataMap;

/// 提取指定 header 的第一个值
pub fn first_header_value(metadata: &MetadataMap, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// 拆分完整方法路径 `/package.Service/Method` 为 (service, method)
///
/// 无法解析时返回 ("unknown", "unknown")。
pub fn parse_rpc_method(full_method: &str) -> (&str, &str) {
    let trimmed = full_method.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((service, method)) if !service.is_empty() && !method.is_empty() => (service, method),
        _ => ("unknown", "unknown"),
    }
}

/// 网关透传的原始 HTTP 请求信息
///
/// 由网关写入 `x-forwarded-*` 请求头，直连 gRPC 时不存在。
#[derive(Debug, Clone, Default)]
pub struct GatewayInfo {
    pub method: Option<String>,
    pub path: Option<String>,
    pub scheme: Option<String>,
    pub user_agent: Option<String>,
}

/// 提取网关信息
pub fn gateway_info(metadata: &MetadataMap) -> GatewayInfo {
    GatewayInfo {
        method: first_header_value(metadata, "x-forwarded-method"),
        path: first_header_value(metadata, "x-forwarded-path"),
        scheme: first_header_value(metadata, "x-forwarded-scheme"),
        user_agent: first_header_value(metadata, "x-forwarded-user-agent"),
    }
}

/// 本机 IP（进程内只解析一次）
pub fn local_ip() -> &'static str {
    static LOCAL_IP: OnceLock<String> = OnceLock::new();
    LOCAL_IP.get_or_init(|| detect_local_ip().unwrap_or_else(|| "unknown".to_string()))
}

/// 本机主机名（进程内只解析一次）
pub fn local_hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()))
}

// UDP connect 不产生网络流量，仅用于让内核选择出口地址
fn detect_local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}
