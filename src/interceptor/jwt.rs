//! JWT 拦截器
//!
//! 校验 authorization 头中的 Bearer token（HS256），
//! 解出的 claims 写入调用上下文供处理器读取

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tonic::Status;
use tracing::{error, info, warn};

use super::{HEADER_AUTHORIZATION, Next, RpcType, ServerCall, ServerInterceptor};
use crate::registry::{OptionRegistry, OptionsKey};

const BEARER_PREFIX: &str = "Bearer ";

/// 访问令牌携带的 claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    #[serde(default)]
    pub iss: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: usize,
}

/// JWT 配置集
pub struct JwtOptions {
    entry_name: String,
    entry_type: String,
    signing_key: Option<String>,
    issuer: Option<String>,
    ignore_prefixes: Vec<String>,
    decoding_key: Option<DecodingKey>,
}

impl JwtOptions {
    fn defaults() -> Self {
        Self {
            entry_name: "grpc".to_string(),
            entry_type: "grpc".to_string(),
            signing_key: None,
            issuer: None,
            ignore_prefixes: Vec::new(),
            decoding_key: None,
        }
    }

    fn build(options: Vec<JwtOption>) -> Self {
        let mut set = Self::defaults();
        for option in options {
            (option.0)(&mut set);
        }
        set.finalize();
        set
    }

    fn finalize(&mut self) {
        self.decoding_key = self
            .signing_key
            .as_ref()
            .map(|key| DecodingKey::from_secret(key.as_bytes()));
    }

    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    pub fn entry_type(&self) -> &str {
        &self.entry_type
    }

    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// 方法是否需要校验
    ///
    /// 未配置签名密钥、或方法命中豁免前缀时返回 false。
    pub fn should_validate(&self, method: &str) -> bool {
        if self.decoding_key.is_none() {
            return false;
        }
        !self
            .ignore_prefixes
            .iter()
            .any(|prefix| method.starts_with(prefix.as_str()))
    }

    /// 校验 token 并返回解码后的 claims
    pub fn validate_token(&self, token: &str) -> anyhow::Result<JwtClaims> {
        let Some(decoding_key) = self.decoding_key.as_ref() else {
            return Err(anyhow!("no signing key configured"));
        };

        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = self.issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }

        decode::<JwtClaims>(token, decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| anyhow!("invalid token: {err}"))
    }
}

/// JWT 配置函数
pub struct JwtOption(Box<dyn FnOnce(&mut JwtOptions) + Send>);

/// 设置入口标识
pub fn with_entry_name_and_type(name: impl Into<String>, kind: impl Into<String>) -> JwtOption {
    let name = name.into();
    let kind = kind.into();
    JwtOption(Box::new(move |set| {
        set.entry_name = name;
        set.entry_type = kind;
    }))
}

/// 设置 HS256 签名密钥（空串视为未配置，拦截器全程放行）
pub fn with_signing_key(key: impl Into<String>) -> JwtOption {
    let key = key.into();
    JwtOption(Box::new(move |set| {
        if !key.is_empty() {
            set.signing_key = Some(key);
        }
    }))
}

/// 设置签发者校验
pub fn with_issuer(issuer: impl Into<String>) -> JwtOption {
    let issuer = issuer.into();
    JwtOption(Box::new(move |set| {
        set.issuer = Some(issuer);
    }))
}

/// 追加豁免校验的方法前缀（自动补全前导 `/`）
pub fn with_ignore_prefix<I, S>(prefixes: I) -> JwtOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
    JwtOption(Box::new(move |set| {
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

/// JWT 拦截器
pub struct JwtInterceptor {
    set: Arc<JwtOptions>,
}

impl JwtInterceptor {
    /// 构造拦截器并注册配置集
    pub fn new(registry: &OptionRegistry, rpc_type: RpcType, options: Vec<JwtOption>) -> Self {
        let candidate = JwtOptions::build(options);
        let key = OptionsKey::new(candidate.entry_name.clone(), rpc_type);
        let set = registry.jwt().get_or_register(key, candidate);
        Self { set }
    }

    /// 拦截器绑定的配置集
    pub fn option_set(&self) -> Arc<JwtOptions> {
        self.set.clone()
    }
}

#[async_trait]
impl ServerInterceptor for JwtInterceptor {
    fn name(&self) -> &'static str {
        "jwt"
    }

    async fn intercept(&self, call: &ServerCall, next: Next<'_>) -> Result<(), Status> {
        let cx = call.context();
        cx.set_entry_name(self.set.entry_name());

        if !self.set.should_validate(call.info().full_method()) {
            return next.run(call).await;
        }

        let header = cx.first_incoming(HEADER_AUTHORIZATION);
        let Some(token) = header
            .as_deref()
            .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        else {
            warn!(
                method = call.info().full_method(),
                "Missing bearer token in authorization header"
            );
            return Err(Status::unauthenticated("Missing bearer token"));
        };

        match self.set.validate_token(token) {
            Ok(claims) => {
                info!(subject = %claims.sub, "Request authenticated");
                cx.set_jwt_claims(claims);
                next.run(call).await
            }
            Err(err) => {
                error!(?err, "Invalid token");
                Err(Status::unauthenticated("Invalid or expired token"))
            }
        }
    }
}
