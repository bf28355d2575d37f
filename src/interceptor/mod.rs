//! gRPC 拦截器模块
//!
//! 提供认证、元数据、追踪、JWT 拦截器，以及按序组合的拦截器链

pub mod auth;
pub mod chain;
pub mod jwt;
pub mod meta;
pub mod tracing;

pub use auth::AuthInterceptor;
pub use chain::{ChainBuilder, InterceptorChain, Next};
pub use jwt::JwtInterceptor;
pub use meta::MetaInterceptor;
pub use tracing::TracingInterceptor;

use async_trait::async_trait;
use tonic::Status;

use crate::context::RpcContext;
use crate::utils::parse_rpc_method;

/// 入站凭证头（Basic / Bearer）
pub const HEADER_AUTHORIZATION: &str = "authorization";
/// 入站 API Key 头
pub const HEADER_API_KEY: &str = "x-api-key";
/// 出站请求 ID 头
pub const HEADER_REQUEST_ID: &str = "x-request-id";
/// 出站追踪 ID 头
pub const HEADER_TRACE_ID: &str = "x-trace-id";
/// 认证质询头
pub const HEADER_WWW_AUTHENTICATE: &str = "www-authenticate";

/// RPC 形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcType {
    UnaryServer,
    StreamServer,
}

impl RpcType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcType::UnaryServer => "unaryServer",
            RpcType::StreamServer => "streamServer",
        }
    }
}

/// 调用信息
#[derive(Debug, Clone)]
pub struct CallInfo {
    full_method: String,
    rpc_type: RpcType,
}

impl CallInfo {
    pub fn unary(full_method: impl Into<String>) -> Self {
        Self {
            full_method: full_method.into(),
            rpc_type: RpcType::UnaryServer,
        }
    }

    pub fn stream(full_method: impl Into<String>) -> Self {
        Self {
            full_method: full_method.into(),
            rpc_type: RpcType::StreamServer,
        }
    }

    /// 完整方法路径，如 `/chat.ChatService/SendMessage`
    pub fn full_method(&self) -> &str {
        &self.full_method
    }

    pub fn rpc_type(&self) -> RpcType {
        self.rpc_type
    }

    /// gRPC 服务名（方法路径第一段）
    pub fn grpc_service(&self) -> &str {
        parse_rpc_method(&self.full_method).0
    }

    /// gRPC 方法名（方法路径第二段）
    pub fn grpc_method(&self) -> &str {
        parse_rpc_method(&self.full_method).1
    }
}

/// 链中流转的调用视图
///
/// 消息体不经过拦截器，拦截器只接触调用信息与共享上下文。
pub struct ServerCall {
    info: CallInfo,
    context: RpcContext,
}

impl ServerCall {
    pub fn new(info: CallInfo, context: RpcContext) -> Self {
        Self { info, context }
    }

    pub fn info(&self) -> &CallInfo {
        &self.info
    }

    pub fn context(&self) -> &RpcContext {
        &self.context
    }
}

/// 服务端拦截器
///
/// `next.run` 之前为 before 阶段，返回之后为 after 阶段；
/// 不调用 `next` 即短路调用，处理器不会执行。
#[async_trait]
pub trait ServerInterceptor: Send + Sync {
    /// 拦截器名称（用于日志）
    fn name(&self) -> &'static str;

    async fn intercept(&self, call: &ServerCall, next: Next<'_>) -> Result<(), Status>;
}
