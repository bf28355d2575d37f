//! 统一错误类型
//!
//! 提供中间件错误与 gRPC Status 之间的转换

use thiserror::Error;
use tonic::Status;

/// Gantry 中间件统一错误类型
#[derive(Error, Debug)]
pub enum GantryError {
    /// 认证失败（拦截器拒绝请求）
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// 配置内容无效
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// 配置文件读取失败
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 配置文件解析失败
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// 遥测初始化失败
    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

impl GantryError {
    /// 创建认证失败错误
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        GantryError::Unauthenticated(msg.into())
    }

    /// 创建配置错误
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        GantryError::InvalidConfig(msg.into())
    }

    /// 创建遥测错误
    pub fn telemetry(msg: impl Into<String>) -> Self {
        GantryError::Telemetry(msg.into())
    }
}

impl From<GantryError> for Status {
    fn from(err: GantryError) -> Self {
        match err {
            GantryError::Unauthenticated(msg) => Status::unauthenticated(msg),
            GantryError::InvalidConfig(msg) => Status::invalid_argument(msg),
            GantryError::Io(err) => Status::unavailable(err.to_string()),
            GantryError::ConfigParse(err) => Status::internal(err.to_string()),
            GantryError::Telemetry(msg) => Status::internal(msg),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, GantryError>;
