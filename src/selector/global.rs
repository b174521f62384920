//! 进程级默认选择器构建器
//!
//! 客户端未显式指定均衡策略时使用。必须在构建任何客户端之前替换，
//! 不得与客户端构建并发修改。

use super::{wrr, SelectorBuilder};
use std::sync::{Arc, OnceLock, RwLock};

fn global() -> &'static RwLock<Arc<dyn SelectorBuilder>> {
    static GLOBAL: OnceLock<RwLock<Arc<dyn SelectorBuilder>>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(Arc::new(wrr::builder())))
}

/// 返回全局选择器构建器
pub fn global_selector() -> Arc<dyn SelectorBuilder> {
    global().read().unwrap().clone()
}

/// 替换全局选择器构建器
pub fn set_global_selector(builder: Arc<dyn SelectorBuilder>) {
    *global().write().unwrap() = builder;
}
