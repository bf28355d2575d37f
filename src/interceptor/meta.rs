//! 元数据拦截器
//!
//! 为每个调用生成请求 ID，并将应用身份与接收时间
//! 以可配置前缀的 header 返回给客户端

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tonic::Status;
use tracing::debug;
use uuid::Uuid;

use super::{HEADER_REQUEST_ID, Next, RpcType, ServerCall, ServerInterceptor};
use crate::registry::{OptionRegistry, OptionsKey};

/// 对外暴露的应用身份
#[derive(Debug, Clone)]
pub struct AppIdentity {
    app_name: String,
    app_version: String,
}

impl AppIdentity {
    pub fn new(app_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn app_version(&self) -> &str {
        &self.app_version
    }
}

/// 元数据配置集
///
/// header 键名由前缀派生，构造时一次性确定。
pub struct MetaOptions {
    entry_name: String,
    entry_type: String,
    prefix: String,
    app_key: String,
    version_key: String,
    unix_time_key: String,
    received_time_key: String,
}

impl MetaOptions {
    fn defaults() -> Self {
        Self {
            entry_name: "grpc".to_string(),
            entry_type: "grpc".to_string(),
            prefix: "gantry".to_string(),
            app_key: String::new(),
            version_key: String::new(),
            unix_time_key: String::new(),
            received_time_key: String::new(),
        }
    }

    fn build(options: Vec<MetaOption>) -> Self {
        let mut set = Self::defaults();
        for option in options {
            (option.0)(&mut set);
        }
        set.finalize();
        set
    }

    // 元数据键要求小写 ASCII，派生时统一转小写
    fn finalize(&mut self) {
        self.prefix = self.prefix.to_ascii_lowercase();
        let prefix = &self.prefix;
        self.app_key = format!("x-{prefix}-app");
        self.version_key = format!("x-{prefix}-app-version");
        self.unix_time_key = format!("x-{prefix}-app-unix-time");
        self.received_time_key = format!("x-{prefix}-request-received-time");
    }

    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    pub fn entry_type(&self) -> &str {
        &self.entry_type
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    pub fn version_key(&self) -> &str {
        &self.version_key
    }

    pub fn unix_time_key(&self) -> &str {
        &self.unix_time_key
    }

    pub fn received_time_key(&self) -> &str {
        &self.received_time_key
    }
}

/// 元数据配置函数
pub struct MetaOption(Box<dyn FnOnce(&mut MetaOptions) + Send>);

/// 设置入口标识
pub fn with_entry_name_and_type(name: impl Into<String>, kind: impl Into<String>) -> MetaOption {
    let name = name.into();
    let kind = kind.into();
    MetaOption(Box::new(move |set| {
        set.entry_name = name;
        set.entry_type = kind;
    }))
}

/// 设置 header 键名前缀（空串保留默认前缀）
pub fn with_prefix(prefix: impl Into<String>) -> MetaOption {
    let prefix = prefix.into();
    MetaOption(Box::new(move |set| {
        if !prefix.is_empty() {
            set.prefix = prefix;
        }
    }))
}

/// 元数据拦截器
pub struct MetaInterceptor {
    set: Arc<MetaOptions>,
    identity: AppIdentity,
}

impl MetaInterceptor {
    /// 构造拦截器并注册配置集
    pub fn new(
        registry: &OptionRegistry,
        identity: AppIdentity,
        rpc_type: RpcType,
        options: Vec<MetaOption>,
    ) -> Self {
        let candidate = MetaOptions::build(options);
        let key = OptionsKey::new(candidate.entry_name.clone(), rpc_type);
        let set = registry.meta().get_or_register(key, candidate);
        Self { set, identity }
    }

    /// 拦截器绑定的配置集
    pub fn option_set(&self) -> Arc<MetaOptions> {
        self.set.clone()
    }
}

#[async_trait]
impl ServerInterceptor for MetaInterceptor {
    fn name(&self) -> &'static str {
        "meta"
    }

    async fn intercept(&self, call: &ServerCall, next: Next<'_>) -> Result<(), Status> {
        let cx = call.context();
        cx.set_entry_name(self.set.entry_name());

        let request_id = Uuid::new_v4().to_string();
        cx.set_request_id(request_id.clone());
        cx.add_header_to_client(HEADER_REQUEST_ID, &request_id);
        tracing::Span::current().record("request_id", request_id.as_str());
        debug!(
            request_id = %request_id,
            method = call.info().full_method(),
            "Request received"
        );

        let received_at = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        cx.add_header_to_client(self.set.app_key(), self.identity.app_name());
        cx.add_header_to_client(self.set.version_key(), self.identity.app_version());
        cx.add_header_to_client(self.set.unix_time_key(), &received_at);
        cx.add_header_to_client(self.set.received_time_key(), &received_at);

        match next.run(call).await {
            Ok(()) => Ok(()),
            Err(status) => {
                cx.record_error(status.clone());
                Err(status)
            }
        }
    }
}
