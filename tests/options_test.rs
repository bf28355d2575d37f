//! 配置集注册表与配置桥接测试
//!
//! 覆盖 (入口名, RPC 类型) 键的注册语义、各配置集的门控判断，
//! 以及 TOML 配置到拦截器链的组装。

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use tonic::metadata::MetadataValue;
use tonic::{Request, Response, Status};

use gantry_grpc::AppIdentity;
use gantry_grpc::config::MiddlewareConfig;
use gantry_grpc::context::RpcContext;
use gantry_grpc::interceptor::{
    AuthInterceptor, JwtInterceptor, MetaInterceptor, RpcType, auth, jwt, meta,
};
use gantry_grpc::registry::{OptionRegistry, OptionsKey};

const SAMPLE_CONFIG: &str = r#"
[service]
name = "chat-server"
version = "v1.2.3"

[entry]
name = "chat"
kind = "grpc"

[auth]
enabled = true
basic = ["admin:secret"]
api_keys = ["ci-key"]
realm = "gantry"

[meta]
enabled = true
prefix = "acme"

[jwt]
enabled = true
signing_key = "test-secret"

[tracing]
enabled = true
"#;

/// 生成测试用 HS256 token
fn make_token(key: &str, exp_offset: i64, issuer: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = gantry_grpc::JwtClaims {
        sub: "user-1".to_string(),
        iss: issuer.to_string(),
        exp: (now + exp_offset) as usize,
        iat: now as usize,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(key.as_bytes()),
    )
    .expect("Failed to encode token")
}

/// 测试：同一键只注册一次，先注册者生效
#[test]
fn test_same_key_registers_once() {
    let registry = OptionRegistry::new();
    let first = AuthInterceptor::new(
        &registry,
        RpcType::UnaryServer,
        vec![
            auth::with_entry_name_and_type("chat", "grpc"),
            auth::with_basic_auth(["admin:secret"]),
        ],
    );
    let second = AuthInterceptor::new(
        &registry,
        RpcType::UnaryServer,
        vec![
            auth::with_entry_name_and_type("chat", "grpc"),
            auth::with_basic_auth(["other:creds"]),
        ],
    );

    assert!(
        Arc::ptr_eq(&first.option_set(), &second.option_set()),
        "Same key must reuse the registered set"
    );
    assert_eq!(registry.auth().len(), 1);

    // 第二次注册的凭证被丢弃
    let kept = format!("Basic {}", BASE64_STANDARD.encode("admin:secret"));
    let discarded = format!("Basic {}", BASE64_STANDARD.encode("other:creds"));
    assert!(second.option_set().authorized(Some(&kept), None));
    assert!(!second.option_set().authorized(Some(&discarded), None));
}

/// 测试：不同 RPC 类型注册独立的配置集
#[test]
fn test_distinct_rpc_types_register_separately() {
    let registry = OptionRegistry::new();
    let unary = AuthInterceptor::new(
        &registry,
        RpcType::UnaryServer,
        vec![auth::with_entry_name_and_type("chat", "grpc")],
    );
    let stream = AuthInterceptor::new(
        &registry,
        RpcType::StreamServer,
        vec![auth::with_entry_name_and_type("chat", "grpc")],
    );

    assert!(!Arc::ptr_eq(&unary.option_set(), &stream.option_set()));
    assert_eq!(registry.auth().len(), 2);
    assert!(
        registry
            .auth()
            .get(&OptionsKey::new("chat", RpcType::UnaryServer))
            .is_some()
    );
    assert!(
        registry
            .auth()
            .get(&OptionsKey::new("chat", RpcType::StreamServer))
            .is_some()
    );
}

/// 测试：列表配置逐项累积，标量配置后写覆盖
#[test]
fn test_option_application_order() {
    let registry = OptionRegistry::new();
    let set = AuthInterceptor::new(
        &registry,
        RpcType::UnaryServer,
        vec![
            auth::with_entry_name_and_type("first", "grpc"),
            auth::with_api_keys(["k1"]),
            auth::with_api_keys(["k2"]),
            auth::with_entry_name_and_type("second", "grpc"),
        ],
    )
    .option_set();

    assert_eq!(set.entry_name(), "second", "Scalar fields must keep the last write");
    assert!(set.authorized(None, Some("k1")));
    assert!(set.authorized(None, Some("k2")));
    assert!(
        registry
            .auth()
            .get(&OptionsKey::new("second", RpcType::UnaryServer))
            .is_some(),
        "Registry key must use the final entry name"
    );
}

/// 测试：认证门控判断
#[test]
fn test_should_auth_gating() {
    let registry = OptionRegistry::new();

    // 未配置任何凭证时不要求认证
    let open = AuthInterceptor::new(
        &registry,
        RpcType::UnaryServer,
        vec![auth::with_entry_name_and_type("open", "grpc")],
    )
    .option_set();
    assert!(!open.should_auth("/chat.ChatService/Send"));

    // 配置凭证后要求认证，豁免前缀除外；未带 / 的前缀会被补全
    let guarded = AuthInterceptor::new(
        &registry,
        RpcType::UnaryServer,
        vec![
            auth::with_entry_name_and_type("guarded", "grpc"),
            auth::with_api_keys(["key-1"]),
            auth::with_ignore_prefix(["grpc.health"]),
        ],
    )
    .option_set();
    assert!(guarded.should_auth("/chat.ChatService/Send"));
    assert!(!guarded.should_auth("/grpc.health.v1.Health/Check"));
}

/// 测试：双凭证按 OR 语义判定
#[test]
fn test_credential_or_semantics() {
    let registry = OptionRegistry::new();
    let set = AuthInterceptor::new(
        &registry,
        RpcType::UnaryServer,
        vec![
            auth::with_entry_name_and_type("chat", "grpc"),
            auth::with_basic_auth(["admin:secret"]),
            auth::with_api_keys(["key-1"]),
        ],
    )
    .option_set();

    let good = format!("Basic {}", BASE64_STANDARD.encode("admin:secret"));
    let bad = format!("Basic {}", BASE64_STANDARD.encode("nope:nope"));

    assert!(set.authorized(Some(&good), None));
    assert!(set.authorized(None, Some("key-1")));
    assert!(
        set.authorized(Some(&bad), Some("key-1")),
        "A valid API key must rescue a bad basic credential"
    );
    assert!(!set.authorized(Some(&bad), Some("wrong")));
    assert!(
        !set.authorized(Some("Bearer xyz"), None),
        "Non-basic scheme is not a basic credential"
    );
    assert!(!set.authorized(None, None));
}

/// 测试：元数据 header 键名由前缀派生
#[test]
fn test_meta_prefix_derivation() {
    let registry = OptionRegistry::new();
    let set = MetaInterceptor::new(
        &registry,
        AppIdentity::new("chat-server", "v1.2.3"),
        RpcType::UnaryServer,
        vec![
            meta::with_entry_name_and_type("chat", "grpc"),
            meta::with_prefix("Acme"),
        ],
    )
    .option_set();
    assert_eq!(set.prefix(), "acme", "Prefix must be lowercased");
    assert_eq!(set.app_key(), "x-acme-app");
    assert_eq!(set.version_key(), "x-acme-app-version");
    assert_eq!(set.unix_time_key(), "x-acme-app-unix-time");
    assert_eq!(set.received_time_key(), "x-acme-request-received-time");

    // 默认前缀
    let defaults = MetaInterceptor::new(
        &registry,
        AppIdentity::new("chat-server", "v1.2.3"),
        RpcType::StreamServer,
        vec![],
    )
    .option_set();
    assert_eq!(defaults.prefix(), "gantry");
    assert_eq!(defaults.app_key(), "x-gantry-app");
}

/// 测试：JWT 门控与 token 校验
#[test]
fn test_jwt_gating_and_validation() {
    let registry = OptionRegistry::new();

    // 未配置签名密钥时不校验
    let open = JwtInterceptor::new(
        &registry,
        RpcType::UnaryServer,
        vec![jwt::with_entry_name_and_type("open", "grpc")],
    )
    .option_set();
    assert!(!open.should_validate("/chat.ChatService/Send"));

    let set = JwtInterceptor::new(
        &registry,
        RpcType::UnaryServer,
        vec![
            jwt::with_entry_name_and_type("chat", "grpc"),
            jwt::with_signing_key("test-secret"),
            jwt::with_issuer("gantry"),
            jwt::with_ignore_prefix(["/grpc.reflection"]),
        ],
    )
    .option_set();
    assert!(set.should_validate("/chat.ChatService/Send"));
    assert!(!set.should_validate("/grpc.reflection.v1.ServerReflection/Info"));

    let token = make_token("test-secret", 3600, "gantry");
    let claims = set.validate_token(&token).expect("Valid token should decode");
    assert_eq!(claims.sub, "user-1");
    assert_eq!(claims.iss, "gantry");

    let wrong_issuer = make_token("test-secret", 3600, "someone-else");
    assert!(set.validate_token(&wrong_issuer).is_err());

    let wrong_key = make_token("other-secret", 3600, "gantry");
    assert!(set.validate_token(&wrong_key).is_err());
}

/// 测试：TOML 配置组装拦截器链并注册配置集
#[test]
fn test_config_bridge_builds_chain() {
    let config: MiddlewareConfig = toml::from_str(SAMPLE_CONFIG).expect("Config should parse");
    let registry = OptionRegistry::new();
    let chain = config.build_chain(&registry, RpcType::UnaryServer);

    assert_eq!(
        chain.len(),
        4,
        "All enabled sections must contribute an interceptor"
    );

    let key = OptionsKey::new("chat", RpcType::UnaryServer);
    assert!(registry.auth().get(&key).is_some());
    assert!(registry.trace().get(&key).is_some());

    let meta_set = registry.meta().get(&key).expect("Meta set must be registered");
    assert_eq!(meta_set.prefix(), "acme");

    let jwt_set = registry.jwt().get(&key).expect("Jwt set must be registered");
    assert!(jwt_set.should_validate("/chat.ChatService/Send"));

    let identity = config.service.identity();
    assert_eq!(identity.app_name(), "chat-server");
    assert_eq!(identity.app_version(), "v1.2.3");
}

/// 测试：配置组装的链可以完整驱动一次调用
#[tokio::test]
async fn test_config_chain_end_to_end() {
    let config: MiddlewareConfig = toml::from_str(SAMPLE_CONFIG).expect("Config should parse");
    let registry = OptionRegistry::new();
    let chain = config.build_chain(&registry, RpcType::UnaryServer);

    // API Key 满足认证，Bearer token 满足 JWT 校验
    let token = make_token("test-secret", 3600, "");
    let mut request = Request::new(());
    request.metadata_mut().insert(
        "x-api-key",
        MetadataValue::try_from("ci-key").expect("metadata value"),
    );
    request.metadata_mut().insert(
        "authorization",
        MetadataValue::try_from(format!("Bearer {token}")).expect("metadata value"),
    );

    let response = chain
        .intercept_unary(
            "/chat.ChatService/Send",
            request,
            |req: Request<()>| async move {
                let cx = RpcContext::from_request(&req).expect("request must carry a context");
                assert_eq!(cx.entry_name().as_deref(), Some("chat"));
                assert_eq!(
                    cx.jwt_claims().map(|c| c.sub).as_deref(),
                    Some("user-1"),
                    "Handler must see the decoded claims"
                );
                Ok::<_, Status>(Response::new(()))
            },
        )
        .await
        .expect("Fully credentialed call should pass every interceptor");

    let metadata = response.metadata();
    assert!(metadata.contains_key("x-request-id"));
    assert_eq!(
        metadata.get("x-acme-app").and_then(|v| v.to_str().ok()),
        Some("chat-server")
    );
    // tracing 段未注入 provider，noop tracer 不回传 trace id
    assert!(metadata.get("x-trace-id").is_none());
}

/// 测试：最小配置使用默认值且不组装拦截器
#[test]
fn test_config_defaults_disable_everything() {
    let config: MiddlewareConfig =
        toml::from_str("[service]\nname = \"svc\"\nversion = \"v1\"\n")
            .expect("Minimal config should parse");

    assert_eq!(config.entry.name, "grpc");
    assert_eq!(config.entry.kind, "grpc");
    assert!(!config.auth.enabled);
    assert!(!config.jwt.enabled);

    let registry = OptionRegistry::new();
    let chain = config.build_chain(&registry, RpcType::UnaryServer);
    assert!(chain.is_empty());
    assert!(registry.auth().is_empty());
    assert!(registry.meta().is_empty());
}

/// 测试：从文件加载配置
#[test]
fn test_load_from_file() {
    let path = std::env::temp_dir().join(format!("gantry-config-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(&path, SAMPLE_CONFIG).expect("Failed to write config file");

    let config = MiddlewareConfig::load_from_file(path.to_str().expect("utf8 path"))
        .expect("Failed to load config");
    assert_eq!(config.service.name, "chat-server");
    assert!(config.auth.enabled);

    std::fs::remove_file(&path).ok();

    // 不存在的文件返回错误
    assert!(MiddlewareConfig::load_from_file("/nonexistent/gantry.toml").is_err());
}
