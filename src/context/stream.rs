//! 流式调用包装
//!
//! 为流式处理器提供与一元调用一致的上下文访问方式

use async_trait::async_trait;
use tonic::Status;
use tonic::metadata::MetadataMap;

use super::RpcContext;

/// 服务端流能力集合
///
/// 由传输层胶水代码按调用实现，拦截器与处理器通过该 trait
/// 操作流，不感知底层传输。
#[async_trait]
pub trait ServerStream: Send {
    type Inbound: Send;
    type Outbound: Send;

    /// 流关联的调用上下文
    fn context(&self) -> &RpcContext;

    /// 暂存响应头（随首个消息发送）
    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status>;

    /// 立即发送响应头
    async fn send_header(&mut self, metadata: MetadataMap) -> Result<(), Status>;

    /// 设置 trailer
    fn set_trailer(&mut self, metadata: MetadataMap);

    /// 发送一条消息
    async fn send_message(&mut self, message: Self::Outbound) -> Result<(), Status>;

    /// 接收一条消息，流结束时返回 None
    async fn recv_message(&mut self) -> Result<Option<Self::Inbound>, Status>;
}

/// 流代理
///
/// 持有可替换的包装上下文，上下文之外的所有操作原样透传给
/// 内部流。每个流式调用一个实例，不跨调用复用。
pub struct WrappedServerStream<S> {
    inner: S,
    context: RpcContext,
}

impl<S: ServerStream> WrappedServerStream<S> {
    /// 包装原始流，初始上下文取自原始流
    pub fn wrap(inner: S) -> Self {
        let context = inner.context().clone();
        Self { inner, context }
    }

    /// 替换包装上下文
    pub fn replace_context(&mut self, context: RpcContext) {
        self.context = context;
    }

    /// 取回内部流
    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: ServerStream> ServerStream for WrappedServerStream<S> {
    type Inbound = S::Inbound;
    type Outbound = S::Outbound;

    fn context(&self) -> &RpcContext {
        &self.context
    }

    fn set_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        self.inner.set_header(metadata)
    }

    async fn send_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        self.inner.send_header(metadata).await
    }

    fn set_trailer(&mut self, metadata: MetadataMap) {
        self.inner.set_trailer(metadata)
    }

    async fn send_message(&mut self, message: Self::Outbound) -> Result<(), Status> {
        self.inner.send_message(message).await
    }

    async fn recv_message(&mut self) -> Result<Option<Self::Inbound>, Status> {
        self.inner.recv_message().await
    }
}
