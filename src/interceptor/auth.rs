//! 认证拦截器
//!
//! Basic Auth 与 API Key 双凭证认证，任一命中即放行；
//! 未配置凭证或方法命中豁免前缀时跳过认证

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use tonic::Status;
use tracing::warn;

use super::{
    HEADER_API_KEY, HEADER_AUTHORIZATION, HEADER_WWW_AUTHENTICATE, Next, RpcType, ServerCall,
    ServerInterceptor,
};
use crate::registry::{OptionRegistry, OptionsKey};

const BASIC_PREFIX: &str = "Basic ";

/// 认证配置集
///
/// 构造完成后不可变，注册到 OptionRegistry 并被拦截器持有。
pub struct AuthOptions {
    entry_name: String,
    entry_type: String,
    basic_realm: String,
    basic_accounts: HashSet<String>,
    api_keys: HashSet<String>,
    ignore_prefixes: Vec<String>,
}

impl AuthOptions {
    fn defaults() -> Self {
        Self {
            entry_name: "grpc".to_string(),
            entry_type: "grpc".to_string(),
            basic_realm: String::new(),
            basic_accounts: HashSet::new(),
            api_keys: HashSet::new(),
            ignore_prefixes: Vec::new(),
        }
    }

    fn build(options: Vec<AuthOption>) -> Self {
        let mut set = Self::defaults();
        for option in options {
            (option.0)(&mut set);
        }
        set
    }

    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    pub fn entry_type(&self) -> &str {
        &self.entry_type
    }

    /// 方法是否需要认证
    ///
    /// 两类凭证都未配置、或方法命中任一豁免前缀时返回 false。
    pub fn should_auth(&self, method: &str) -> bool {
        if self.basic_accounts.is_empty() && self.api_keys.is_empty() {
            return false;
        }
        !self
            .ignore_prefixes
            .iter()
            .any(|prefix| method.starts_with(prefix.as_str()))
    }

    /// 校验凭证
    ///
    /// Basic 凭证与注册时相同编码后比对，API Key 原值比对，
    /// 任一命中即授权。
    pub fn authorized(&self, basic_header: Option<&str>, api_key: Option<&str>) -> bool {
        if let Some(header) = basic_header {
            if let Some(credential) = header.strip_prefix(BASIC_PREFIX) {
                if self.basic_accounts.contains(credential) {
                    return true;
                }
            }
        }
        if let Some(key) = api_key {
            if self.api_keys.contains(key) {
                return true;
            }
        }
        false
    }

    fn challenge_header(&self) -> Option<String> {
        if self.basic_realm.is_empty() || self.basic_accounts.is_empty() {
            return None;
        }
        Some(format!("Basic realm=\"{}\"", self.basic_realm))
    }
}

/// 认证配置函数
pub struct AuthOption(Box<dyn FnOnce(&mut AuthOptions) + Send>);

/// 设置入口标识
pub fn with_entry_name_and_type(name: impl Into<String>, kind: impl Into<String>) -> AuthOption {
    let name = name.into();
    let kind = kind.into();
    AuthOption(Box::new(move |set| {
        set.entry_name = name;
        set.entry_type = kind;
    }))
}

/// 注册 Basic 凭证
///
/// 凭证为 `user:pass` 形式，应用时做 base64 编码，与请求头中
/// `Basic <credential>` 的凭证部分直接比对。
pub fn with_basic_auth<I, S>(credentials: I) -> AuthOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let credentials: Vec<String> = credentials.into_iter().map(Into::into).collect();
    AuthOption(Box::new(move |set| {
        for credential in credentials {
            set.basic_accounts
                .insert(BASE64_STANDARD.encode(credential.as_bytes()));
        }
    }))
}

/// 设置 Basic 质询 realm（拒绝时随 www-authenticate 返回）
pub fn with_basic_realm(realm: impl Into<String>) -> AuthOption {
    let realm = realm.into();
    AuthOption(Box::new(move |set| {
        set.basic_realm = realm;
    }))
}

/// 注册 API Key
pub fn with_api_keys<I, S>(keys: I) -> AuthOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
    AuthOption(Box::new(move |set| {
        set.api_keys.extend(keys);
    }))
}

/// 追加豁免认证的方法前缀（自动补全前导 `/`）
pub fn with_ignore_prefix<I, S>(prefixes: I) -> AuthOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
    AuthOption(Box::new(move |set| {
        for prefix in prefixes {
            let normalized = if prefix.starts_with('/') {
                prefix
            } else {
                format!("/{prefix}")
            };
            set.ignore_prefixes.push(normalized);
        }
    }))
}

/// 认证拦截器
pub struct AuthInterceptor {
    set: Arc<AuthOptions>,
}

impl AuthInterceptor {
    /// 构造拦截器并注册配置集
    ///
    /// 相同 (入口名, RPC 类型) 已注册过时，沿用已注册的配置集，
    /// 本次传入的配置被丢弃。
    pub fn new(registry: &OptionRegistry, rpc_type: RpcType, options: Vec<AuthOption>) -> Self {
        let candidate = AuthOptions::build(options);
        let key = OptionsKey::new(candidate.entry_name.clone(), rpc_type);
        let set = registry.auth().get_or_register(key, candidate);
        Self { set }
    }

    /// 拦截器绑定的配置集
    pub fn option_set(&self) -> Arc<AuthOptions> {
        self.set.clone()
    }
}

#[async_trait]
impl ServerInterceptor for AuthInterceptor {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn intercept(&self, call: &ServerCall, next: Next<'_>) -> Result<(), Status> {
        let cx = call.context();
        cx.set_entry_name(self.set.entry_name());

        if !self.set.should_auth(call.info().full_method()) {
            return next.run(call).await;
        }

        let basic = cx.first_incoming(HEADER_AUTHORIZATION);
        let api_key = cx.first_incoming(HEADER_API_KEY);

        if self.set.authorized(basic.as_deref(), api_key.as_deref()) {
            return next.run(call).await;
        }

        if let Some(challenge) = self.set.challenge_header() {
            cx.add_header_to_client(HEADER_WWW_AUTHENTICATE, &challenge);
        }

        let message = if basic.is_none() && api_key.is_none() {
            "Missing authorization header, provide either Basic Auth or X-API-Key"
        } else {
            "Invalid credential"
        };
        warn!(
            method = call.info().full_method(),
            entry = self.set.entry_name(),
            "Request rejected by auth interceptor"
        );
        Err(Status::unauthenticated(message))
    }
}
