//! 链路追踪拦截器
//!
//! 基于 OpenTelemetry 的服务端 span 管理：从入站元数据提取远端
//! 父上下文，按 before / after 两阶段记录调用，span 上下文有效时
//! 通过 x-trace-id 返回给客户端。未配置 provider 时使用 noop
//! tracer，调用结果不受任何影响。

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::global::BoxedTracer;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::noop::NoopTracer;
use opentelemetry::trace::{
    SpanKind, Status as SpanStatus, TraceContextExt, Tracer, TracerProvider,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tonic::Status;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, KeyRef, MetadataMap};
use tracing::warn;

use super::{HEADER_TRACE_ID, Next, RpcType, ServerCall, ServerInterceptor};
use crate::registry::{OptionRegistry, OptionsKey};
use crate::utils::{gateway_info, local_hostname, local_ip};

/// 追踪配置集
///
/// 持有 tracer、可选的 provider 与传播器，同一入口的所有调用共享。
pub struct TraceOptions {
    entry_name: String,
    entry_type: String,
    provider: Option<SdkTracerProvider>,
    tracer: BoxedTracer,
    propagator: Box<dyn TextMapPropagator + Send + Sync>,
}

impl TraceOptions {
    fn defaults() -> Self {
        Self {
            entry_name: "grpc".to_string(),
            entry_type: "grpc".to_string(),
            provider: None,
            tracer: BoxedTracer::new(Box::new(NoopTracer::new())),
            propagator: Box::new(TraceContextPropagator::new()),
        }
    }

    fn build(options: Vec<TraceOption>) -> Self {
        let mut set = Self::defaults();
        for option in options {
            (option.0)(&mut set);
        }
        set.finalize();
        set
    }

    // tracer 依赖最终的入口名，所有配置应用完后统一构造
    fn finalize(&mut self) {
        if let Some(provider) = &self.provider {
            self.tracer = BoxedTracer::new(Box::new(provider.tracer(self.entry_name.clone())));
        }
    }

    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    pub fn entry_type(&self) -> &str {
        &self.entry_type
    }

    pub fn tracer(&self) -> &BoxedTracer {
        &self.tracer
    }

    pub fn provider(&self) -> Option<&SdkTracerProvider> {
        self.provider.as_ref()
    }

    pub fn propagator(&self) -> &(dyn TextMapPropagator + Send + Sync) {
        self.propagator.as_ref()
    }

    /// 开始一次调用的服务端 span
    ///
    /// 从 carrier 提取远端父上下文并在其下开启 Server span；
    /// span 上下文有效时返回可回传的 trace id。
    pub fn before(&self, input: BeforeInput<'_>) -> BeforeOutput {
        let parent = self.propagator.extract(&MetadataCarrier(input.carrier));
        let span = self
            .tracer
            .span_builder(input.span_name)
            .with_kind(SpanKind::Server)
            .with_attributes(input.attributes)
            .start_with_context(&self.tracer, &parent);
        let otel_context = parent.with_span(span);
        let trace_id = {
            let span_context = otel_context.span().span_context().clone();
            span_context
                .is_valid()
                .then(|| span_context.trace_id().to_string())
        };
        BeforeOutput {
            otel_context,
            trace_id,
        }
    }

    /// 结束 before 开启的 span
    ///
    /// 追加结果属性并按 res_message 是否为空置 Ok / Error 状态。
    pub fn after(&self, scope: &BeforeOutput, input: AfterInput) {
        let span = scope.otel_context.span();
        for attribute in input.attributes {
            span.set_attribute(attribute);
        }
        span.set_attribute(KeyValue::new("res.code", input.res_code));
        if input.res_message.is_empty() {
            span.set_status(SpanStatus::Ok);
        } else {
            span.set_status(SpanStatus::error(input.res_message));
        }
        span.end();
    }

    /// 用注册的传播器将追踪上下文注入出站元数据
    pub fn inject_context(&self, cx: &Context, target: &mut MetadataMap) {
        self.propagator
            .inject_context(cx, &mut MetadataInjector(target));
    }
}

/// before 阶段输入
pub struct BeforeInput<'a> {
    pub span_name: String,
    pub carrier: &'a MetadataMap,
    pub attributes: Vec<KeyValue>,
}

/// before 阶段输出，after 阶段凭此定位 span
pub struct BeforeOutput {
    pub otel_context: Context,
    pub trace_id: Option<String>,
}

/// after 阶段输入
pub struct AfterInput {
    pub res_code: i64,
    pub res_message: String,
    pub attributes: Vec<KeyValue>,
}

impl AfterInput {
    /// 处理成功的结束输入
    pub fn success() -> Self {
        Self {
            res_code: 200,
            res_message: String::new(),
            attributes: vec![
                KeyValue::new("grpc.code", 0_i64),
                KeyValue::new("grpc.status", "Ok"),
            ],
        }
    }

    /// 从错误 Status 构造结束输入
    pub fn from_status(status: &Status) -> Self {
        let code = status.code();
        Self {
            res_code: code as i64,
            res_message: status.message().to_string(),
            attributes: vec![
                KeyValue::new("grpc.code", code as i64),
                KeyValue::new("grpc.status", format!("{code:?}")),
            ],
        }
    }
}

/// 追踪配置函数
pub struct TraceOption(Box<dyn FnOnce(&mut TraceOptions) + Send>);

/// 设置入口标识
pub fn with_entry_name_and_type(name: impl Into<String>, kind: impl Into<String>) -> TraceOption {
    let name = name.into();
    let kind = kind.into();
    TraceOption(Box::new(move |set| {
        set.entry_name = name;
        set.entry_type = kind;
    }))
}

/// 设置 tracer provider（未设置时使用 noop tracer）
pub fn with_tracer_provider(provider: SdkTracerProvider) -> TraceOption {
    TraceOption(Box::new(move |set| {
        set.provider = Some(provider);
    }))
}

/// 替换默认的 W3C trace context 传播器
pub fn with_propagator(propagator: impl TextMapPropagator + Send + Sync + 'static) -> TraceOption {
    TraceOption(Box::new(move |set| {
        set.propagator = Box::new(propagator);
    }))
}

/// 入站元数据提取适配
pub struct MetadataCarrier<'a>(pub &'a MetadataMap);

impl Extractor for MetadataCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .map(|key| match key {
                KeyRef::Ascii(key) => key.as_str(),
                KeyRef::Binary(key) => key.as_str(),
            })
            .collect()
    }

    fn get_all(&self, key: &str) -> Option<Vec<&str>> {
        let values: Vec<&str> = self
            .0
            .get_all(key)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        if values.is_empty() { None } else { Some(values) }
    }
}

/// 出站元数据注入适配
pub struct MetadataInjector<'a>(pub &'a mut MetadataMap);

impl Injector for MetadataInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let Ok(name) = key.parse::<AsciiMetadataKey>() else {
            warn!(key, "Dropping trace header with invalid name");
            return;
        };
        let Ok(val) = value.parse::<AsciiMetadataValue>() else {
            warn!(key, "Dropping trace header with invalid value");
            return;
        };
        self.0.insert(name, val);
    }
}

/// 链路追踪拦截器
pub struct TracingInterceptor {
    set: Arc<TraceOptions>,
}

impl TracingInterceptor {
    /// 构造拦截器并注册配置集
    pub fn new(registry: &OptionRegistry, rpc_type: RpcType, options: Vec<TraceOption>) -> Self {
        let candidate = TraceOptions::build(options);
        let key = OptionsKey::new(candidate.entry_name.clone(), rpc_type);
        let set = registry.trace().get_or_register(key, candidate);
        Self { set }
    }

    /// 拦截器绑定的配置集
    pub fn option_set(&self) -> Arc<TraceOptions> {
        self.set.clone()
    }
}

#[async_trait]
impl ServerInterceptor for TracingInterceptor {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn intercept(&self, call: &ServerCall, next: Next<'_>) -> Result<(), Status> {
        let cx = call.context();
        cx.set_entry_name(self.set.entry_name());
        cx.set_trace_scope(self.set.clone());

        let scope = self.set.before(BeforeInput {
            span_name: call.info().full_method().to_string(),
            carrier: cx.incoming_headers(),
            attributes: call_attributes(call),
        });
        if let Some(trace_id) = &scope.trace_id {
            cx.set_otel_context(scope.otel_context.clone());
            cx.add_header_to_client(HEADER_TRACE_ID, trace_id);
        }

        let outcome = next.run(call).await;

        let after_input = match &outcome {
            Ok(()) => AfterInput::success(),
            Err(status) => AfterInput::from_status(status),
        };
        self.set.after(&scope, after_input);

        outcome
    }
}

fn call_attributes(call: &ServerCall) -> Vec<KeyValue> {
    let cx = call.context();
    let info = call.info();
    let mut attributes = vec![
        KeyValue::new("local.IP", local_ip()),
        KeyValue::new("local.hostname", local_hostname()),
        KeyValue::new("grpc.service", info.grpc_service().to_string()),
        KeyValue::new("grpc.method", info.grpc_method().to_string()),
        KeyValue::new("server.type", info.rpc_type().as_str()),
    ];
    if let Some(addr) = cx.remote_addr() {
        attributes.push(KeyValue::new("remote.IP", addr.ip().to_string()));
        attributes.push(KeyValue::new("remote.port", addr.port().to_string()));
    }
    let gateway = gateway_info(cx.incoming_headers());
    if let Some(method) = gateway.method {
        attributes.push(KeyValue::new("gw.method", method));
    }
    if let Some(path) = gateway.path {
        attributes.push(KeyValue::new("gw.path", path));
    }
    if let Some(scheme) = gateway.scheme {
        attributes.push(KeyValue::new("gw.scheme", scheme));
    }
    if let Some(user_agent) = gateway.user_agent {
        attributes.push(KeyValue::new("gw.userAgent", user_agent));
    }
    attributes
}
