//! Gantry gRPC Middleware Library
//!
//! Provides composable server-side interceptors for tonic services including auth,
//! meta, tracing, JWT validation, a per-call shared context, and stream wrapping.

pub mod config;
pub mod error;

// gRPC 中间件功能模块
pub mod context;
pub mod interceptor;
pub mod registry;
pub mod utils;

// OTLP 链路导出（可选）
#[cfg(feature = "telemetry")]
pub mod telemetry;

// Re-exports
pub use config::{
    AuthConfig, EntryConfig, JwtConfig, MetaConfig, MiddlewareConfig, ServiceConfig, TracingConfig,
};
pub use error::{GantryError, Result};

// 中间件相关 re-exports
pub use context::*;
pub use interceptor::jwt::JwtClaims;
pub use interceptor::meta::AppIdentity;
pub use interceptor::*;
pub use registry::*;

// OTLP re-exports（可选）
#[cfg(feature = "telemetry")]
pub use telemetry::{init_tracer_provider, provider_from_config};
