//! 拦截器链
//!
//! 以显式有序列表组合拦截器：before 阶段按注册顺序执行，
//! after 阶段逆序执行，符合嵌套调用语义

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tonic::{Request, Response, Status};
use tracing::debug;

use super::{CallInfo, ServerCall, ServerInterceptor};
use crate::context::{RpcContext, ServerStream, WrappedServerStream};

/// 链最内层执行真实处理器的类型擦除环节
type ErasedHandler<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<(), Status>> + Send + 'a>;

/// 指向链中剩余环节的游标
///
/// 拦截器调用 `run` 进入下一环节；不调用则短路整个调用。
pub struct Next<'a> {
    interceptors: &'a [Arc<dyn ServerInterceptor>],
    handler: ErasedHandler<'a>,
}

impl<'a> Next<'a> {
    fn new(interceptors: &'a [Arc<dyn ServerInterceptor>], handler: ErasedHandler<'a>) -> Self {
        Self {
            interceptors,
            handler,
        }
    }

    /// 执行剩余环节，最终抵达处理器
    pub async fn run(self, call: &ServerCall) -> Result<(), Status> {
        match self.interceptors.split_first() {
            Some((head, rest)) => {
                debug!(
                    interceptor = head.name(),
                    method = call.info().full_method(),
                    "Entering interceptor"
                );
                let next = Next::new(rest, self.handler);
                head.intercept(call, next).await
            }
            None => (self.handler)().await,
        }
    }
}

/// 拦截器链构建器
pub struct ChainBuilder {
    interceptors: Vec<Arc<dyn ServerInterceptor>>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// 追加拦截器，注册顺序即 before 阶段顺序
    pub fn with(mut self, interceptor: impl ServerInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// 追加已共享的拦截器
    pub fn with_arc(mut self, interceptor: Arc<dyn ServerInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> InterceptorChain {
        InterceptorChain {
            interceptors: Arc::from(self.interceptors),
        }
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 组合完成的拦截器链
///
/// 构建后顺序固定，可克隆共享给多个服务实现。
#[derive(Clone)]
pub struct InterceptorChain {
    interceptors: Arc<[Arc<dyn ServerInterceptor>]>,
}

impl InterceptorChain {
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// 一元调用入口
    ///
    /// 包装请求上下文，运行拦截器链，最内层执行处理器。
    /// 成功时将缓冲的出站头写入响应元数据；失败时附加到 Status，
    /// 两条路径都由该边界完成冲刷。
    pub async fn intercept_unary<Req, Resp, H, Fut>(
        &self,
        full_method: &str,
        mut request: Request<Req>,
        handler: H,
    ) -> Result<Response<Resp>, Status>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        H: FnOnce(Request<Req>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Response<Resp>, Status>> + Send + 'static,
    {
        let cx = RpcContext::wrap_server_context(&mut request);
        let call = ServerCall::new(CallInfo::unary(full_method), cx.clone());

        let mut reply: Option<Response<Resp>> = None;
        let outcome = {
            let slot = &mut reply;
            let erased: ErasedHandler<'_> = Box::new(move || {
                Box::pin(async move {
                    let response = handler(request).await?;
                    *slot = Some(response);
                    Ok(())
                })
            });
            Next::new(&self.interceptors, erased).run(&call).await
        };

        match outcome {
            Ok(()) => {
                let mut response = reply.ok_or_else(|| {
                    Status::internal("interceptor chain completed without reaching the handler")
                })?;
                cx.flush_headers_into(response.metadata_mut());
                Ok(response)
            }
            Err(status) => Err(cx.attach_headers_to_status(status)),
        }
    }

    /// 流式调用入口
    ///
    /// 以包装流的上下文运行拦截器链，span 覆盖整个处理器执行期。
    /// 拒绝时缓冲头附加到 Status；成功路径的出站头由传输层胶水
    /// 通过 `drain_client_headers` 写入 trailer。
    pub async fn intercept_stream<S, H, Fut>(
        &self,
        full_method: &str,
        stream: S,
        handler: H,
    ) -> Result<(), Status>
    where
        S: ServerStream + 'static,
        H: FnOnce(WrappedServerStream<S>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let wrapped = WrappedServerStream::wrap(stream);
        let cx = wrapped.context().clone();
        let call = ServerCall::new(CallInfo::stream(full_method), cx.clone());

        let erased: ErasedHandler<'_> = Box::new(move || Box::pin(handler(wrapped)));
        let outcome = Next::new(&self.interceptors, erased).run(&call).await;

        match outcome {
            Ok(()) => Ok(()),
            Err(status) => Err(cx.attach_headers_to_status(status)),
        }
    }
}
