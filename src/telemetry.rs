//! OTLP 链路导出
//!
//! 基于 OTLP/gRPC 的 tracer provider 引导，随 telemetry 功能启用

use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;

use crate::config::MiddlewareConfig;
use crate::error::{GantryError, Result};

/// 构造带批量 OTLP 导出器的 tracer provider
///
/// 返回的 provider 经 `with_tracer_provider` 注入追踪拦截器；
/// 进程退出前由调用方 `shutdown` 冲刷未导出的 span。
pub fn init_tracer_provider(endpoint: &str, service_name: &str) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|err| GantryError::telemetry(format!("failed to create OTLP exporter: {err}")))?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

/// 按配置构造 provider
///
/// tracing 段未启用或缺少 endpoint 时返回 None。
pub fn provider_from_config(config: &MiddlewareConfig) -> Result<Option<SdkTracerProvider>> {
    if !config.tracing.enabled || config.tracing.otlp_endpoint.is_empty() {
        return Ok(None);
    }
    init_tracer_provider(&config.tracing.otlp_endpoint, &config.service.name).map(Some)
}
