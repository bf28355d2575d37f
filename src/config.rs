//! 中间件配置
//!
//! TOML 配置到各拦截器配置函数的桥接，按配置段组装拦截器链

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::interceptor::auth::{self, AuthOption};
use crate::interceptor::chain::{ChainBuilder, InterceptorChain};
use crate::interceptor::jwt::{self, JwtOption};
use crate::interceptor::meta::{self, AppIdentity, MetaOption};
use crate::interceptor::tracing::{self, TraceOption};
use crate::interceptor::{
    AuthInterceptor, JwtInterceptor, MetaInterceptor, RpcType, TracingInterceptor,
};
use crate::registry::OptionRegistry;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MiddlewareConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub entry: EntryConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub meta: MetaConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EntryConfig {
    pub name: String,
    pub kind: String, // grpc, grpc-gateway
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            name: "grpc".to_string(),
            kind: "grpc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub basic: Vec<String>, // user:pass 形式
    pub api_keys: Vec<String>,
    pub ignore_prefixes: Vec<String>,
    pub realm: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtConfig {
    pub enabled: bool,
    pub signing_key: String,
    pub issuer: String,
    pub ignore_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MetaConfig {
    pub enabled: bool,
    pub prefix: String, // 空串使用默认前缀
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    pub otlp_endpoint: String,
}

impl MiddlewareConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MiddlewareConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// 按配置组装拦截器链
    ///
    /// 顺序固定为 tracing、meta、auth、jwt，未启用的段跳过。
    /// tracing 段默认 noop tracer，导出链路需另行注入 provider。
    pub fn build_chain(&self, registry: &OptionRegistry, rpc_type: RpcType) -> InterceptorChain {
        let mut builder = ChainBuilder::new();
        if self.tracing.enabled {
            builder = builder.with(TracingInterceptor::new(
                registry,
                rpc_type,
                self.tracing.to_options(&self.entry),
            ));
        }
        if self.meta.enabled {
            builder = builder.with(MetaInterceptor::new(
                registry,
                self.service.identity(),
                rpc_type,
                self.meta.to_options(&self.entry),
            ));
        }
        if self.auth.enabled {
            builder = builder.with(AuthInterceptor::new(
                registry,
                rpc_type,
                self.auth.to_options(&self.entry),
            ));
        }
        if self.jwt.enabled {
            builder = builder.with(JwtInterceptor::new(
                registry,
                rpc_type,
                self.jwt.to_options(&self.entry),
            ));
        }
        builder.build()
    }
}

impl ServiceConfig {
    pub fn identity(&self) -> AppIdentity {
        AppIdentity::new(self.name.clone(), self.version.clone())
    }
}

impl AuthConfig {
    pub fn to_options(&self, entry: &EntryConfig) -> Vec<AuthOption> {
        let mut options = vec![auth::with_entry_name_and_type(
            entry.name.clone(),
            entry.kind.clone(),
        )];
        if !self.basic.is_empty() {
            options.push(auth::with_basic_auth(self.basic.clone()));
        }
        if !self.api_keys.is_empty() {
            options.push(auth::with_api_keys(self.api_keys.clone()));
        }
        if !self.ignore_prefixes.is_empty() {
            options.push(auth::with_ignore_prefix(self.ignore_prefixes.clone()));
        }
        if !self.realm.is_empty() {
            options.push(auth::with_basic_realm(self.realm.clone()));
        }
        options
    }
}

impl JwtConfig {
    pub fn to_options(&self, entry: &EntryConfig) -> Vec<JwtOption> {
        let mut options = vec![
            jwt::with_entry_name_and_type(entry.name.clone(), entry.kind.clone()),
            jwt::with_signing_key(self.signing_key.clone()),
        ];
        if !self.issuer.is_empty() {
            options.push(jwt::with_issuer(self.issuer.clone()));
        }
        if !self.ignore_prefixes.is_empty() {
            options.push(jwt::with_ignore_prefix(self.ignore_prefixes.clone()));
        }
        options
    }
}

impl MetaConfig {
    pub fn to_options(&self, entry: &EntryConfig) -> Vec<MetaOption> {
        vec![
            meta::with_entry_name_and_type(entry.name.clone(), entry.kind.clone()),
            meta::with_prefix(self.prefix.clone()),
        ]
    }
}

impl TracingConfig {
    pub fn to_options(&self, entry: &EntryConfig) -> Vec<TraceOption> {
        vec![tracing::with_entry_name_and_type(
            entry.name.clone(),
            entry.kind.clone(),
        )]
    }
}
