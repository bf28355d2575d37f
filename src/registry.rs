//! 配置集注册表
//!
//! 按 (入口名, RPC 类型) 维护各中间件种类的配置集，
//! 先注册者生效，重复注册返回已有实例

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::interceptor::RpcType;
use crate::interceptor::auth::AuthOptions;
use crate::interceptor::jwt::JwtOptions;
use crate::interceptor::meta::MetaOptions;
use crate::interceptor::tracing::TraceOptions;

/// 配置集键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptionsKey {
    pub entry_name: String,
    pub rpc_type: RpcType,
}

impl OptionsKey {
    pub fn new(entry_name: impl Into<String>, rpc_type: RpcType) -> Self {
        Self {
            entry_name: entry_name.into(),
            rpc_type,
        }
    }
}

/// 单一中间件种类的配置集存储
///
/// 插入仅发生在拦截器构造期（进程启动），此后只读；
/// 拦截器持有构造时返回的 Arc，稳态路径不经过锁。
pub struct OptionStore<T> {
    sets: Mutex<HashMap<OptionsKey, Arc<T>>>,
}

impl<T> OptionStore<T> {
    fn new() -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
        }
    }

    /// 注册配置集
    ///
    /// 键已存在时丢弃候选配置并返回已注册实例，不做合并。
    pub fn get_or_register(&self, key: OptionsKey, candidate: T) -> Arc<T> {
        let mut sets = lock(&self.sets);
        sets.entry(key).or_insert_with(|| Arc::new(candidate)).clone()
    }

    /// 查找已注册的配置集
    pub fn get(&self, key: &OptionsKey) -> Option<Arc<T>> {
        lock(&self.sets).get(key).cloned()
    }

    /// 已注册的配置集数量
    pub fn len(&self) -> usize {
        lock(&self.sets).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for OptionStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 全中间件种类的配置集注册表
///
/// 由服务引导代码创建并注入各拦截器构造函数，进程级存活，
/// 没有显式销毁。
pub struct OptionRegistry {
    auth: OptionStore<AuthOptions>,
    meta: OptionStore<MetaOptions>,
    trace: OptionStore<TraceOptions>,
    jwt: OptionStore<JwtOptions>,
}

impl OptionRegistry {
    pub fn new() -> Self {
        Self {
            auth: OptionStore::new(),
            meta: OptionStore::new(),
            trace: OptionStore::new(),
            jwt: OptionStore::new(),
        }
    }

    pub fn auth(&self) -> &OptionStore<AuthOptions> {
        &self.auth
    }

    pub fn meta(&self) -> &OptionStore<MetaOptions> {
        &self.meta
    }

    pub fn trace(&self) -> &OptionStore<TraceOptions> {
        &self.trace
    }

    pub fn jwt(&self) -> &OptionStore<JwtOptions> {
        &self.jwt
    }
}

impl Default for OptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
