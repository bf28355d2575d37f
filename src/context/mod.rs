//! 调用上下文模块
//!
//! 为每个 RPC 调用提供跨拦截器共享的上下文：入站元数据、
//! 类型化负载字段、出站响应头缓冲

pub mod stream;

pub use stream::{ServerStream, WrappedServerStream};

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tonic::Request;
use tonic::Status;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tracing::warn;

use crate::interceptor::jwt::JwtClaims;
use crate::interceptor::tracing::TraceOptions;
use crate::utils::first_header_value;

/// 服务端调用上下文
///
/// 克隆共享同一调用的状态，调用结束后随请求一起销毁，
/// 不会跨调用复用。
#[derive(Clone)]
pub struct RpcContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    incoming: MetadataMap,
    remote_addr: Option<SocketAddr>,
    payload: Mutex<Payload>,
    client_headers: Mutex<Vec<(AsciiMetadataKey, AsciiMetadataValue)>>,
}

/// 跨拦截器传递的类型化负载字段
#[derive(Default)]
struct Payload {
    entry_name: Option<String>,
    request_id: Option<String>,
    trace_scope: Option<Arc<TraceOptions>>,
    otel_context: Option<opentelemetry::Context>,
    rpc_error: Option<Status>,
    jwt_claims: Option<JwtClaims>,
}

impl RpcContext {
    /// 从调用原始信息创建根上下文
    pub fn new(incoming: MetadataMap, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                incoming,
                remote_addr,
                payload: Mutex::new(Payload::default()),
                client_headers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 包装请求为服务端上下文（幂等）
    ///
    /// 首次包装时创建上下文并写入请求扩展；请求已携带上下文时
    /// 直接返回同一实例。
    pub fn wrap_server_context<T>(request: &mut Request<T>) -> Self {
        if let Some(existing) = request.extensions().get::<RpcContext>() {
            return existing.clone();
        }
        let cx = RpcContext::new(request.metadata().clone(), request.remote_addr());
        request.extensions_mut().insert(cx.clone());
        cx
    }

    /// 读取请求携带的上下文（未包装时返回 None）
    pub fn from_request<T>(request: &Request<T>) -> Option<Self> {
        request.extensions().get::<RpcContext>().cloned()
    }

    /// 判断两个句柄是否指向同一调用
    pub fn same_call(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// 入站元数据（只读）
    pub fn incoming_headers(&self) -> &MetadataMap {
        &self.inner.incoming
    }

    /// 入站 header 的第一个值
    pub fn first_incoming(&self, key: &str) -> Option<String> {
        first_header_value(&self.inner.incoming, key)
    }

    /// 对端地址
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    // ============================================================
    // 负载字段（后写覆盖先写）
    // ============================================================

    pub fn set_entry_name(&self, name: impl Into<String>) {
        lock(&self.inner.payload).entry_name = Some(name.into());
    }

    pub fn entry_name(&self) -> Option<String> {
        lock(&self.inner.payload).entry_name.clone()
    }

    pub fn set_request_id(&self, request_id: impl Into<String>) {
        lock(&self.inner.payload).request_id = Some(request_id.into());
    }

    pub fn request_id(&self) -> Option<String> {
        lock(&self.inner.payload).request_id.clone()
    }

    /// 发布追踪配置句柄（tracer / provider / propagator）
    pub fn set_trace_scope(&self, scope: Arc<TraceOptions>) {
        lock(&self.inner.payload).trace_scope = Some(scope);
    }

    pub fn trace_scope(&self) -> Option<Arc<TraceOptions>> {
        lock(&self.inner.payload).trace_scope.clone()
    }

    /// 发布携带 span 的 OpenTelemetry 上下文
    pub fn set_otel_context(&self, cx: opentelemetry::Context) {
        lock(&self.inner.payload).otel_context = Some(cx);
    }

    pub fn otel_context(&self) -> Option<opentelemetry::Context> {
        lock(&self.inner.payload).otel_context.clone()
    }

    /// 记录处理器返回的错误（供其他拦截器观察）
    pub fn record_error(&self, status: Status) {
        lock(&self.inner.payload).rpc_error = Some(status);
    }

    pub fn rpc_error(&self) -> Option<Status> {
        lock(&self.inner.payload).rpc_error.clone()
    }

    pub fn set_jwt_claims(&self, claims: JwtClaims) {
        lock(&self.inner.payload).jwt_claims = Some(claims);
    }

    pub fn jwt_claims(&self) -> Option<JwtClaims> {
        lock(&self.inner.payload).jwt_claims.clone()
    }

    // ============================================================
    // 出站响应头缓冲
    // ============================================================

    /// 追加出站响应头
    ///
    /// 同名 header 按追加顺序保留多值，不去重；
    /// 非法的键或值直接丢弃并记录告警。
    pub fn add_header_to_client(&self, key: &str, value: &str) {
        let Ok(name) = key.parse::<AsciiMetadataKey>() else {
            warn!(key, "Dropping outbound header with invalid name");
            return;
        };
        let Ok(val) = value.parse::<AsciiMetadataValue>() else {
            warn!(key, "Dropping outbound header with invalid value");
            return;
        };
        lock(&self.inner.client_headers).push((name, val));
    }

    /// 取走已缓冲的出站头（只会取到一次）
    pub fn drain_client_headers(&self) -> Vec<(AsciiMetadataKey, AsciiMetadataValue)> {
        std::mem::take(&mut *lock(&self.inner.client_headers))
    }

    /// 将缓冲的出站头写入目标元数据
    pub fn flush_headers_into(&self, target: &mut MetadataMap) {
        for (key, value) in self.drain_client_headers() {
            target.append(key, value);
        }
    }

    /// 将缓冲的出站头附加到错误 Status 上
    pub fn attach_headers_to_status(&self, mut status: Status) -> Status {
        self.flush_headers_into(status.metadata_mut());
        status
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
