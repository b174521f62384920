//! 节点过滤器

use super::{Node, NodeFilter};
use std::sync::Arc;

/// 按版本号过滤节点
pub fn version(version: impl Into<String>) -> NodeFilter {
    let version = version.into();
    Arc::new(move |_ctx, nodes: Vec<Node>| {
        nodes.into_iter().filter(|n| n.version() == version).collect()
    })
}
