//! 确定性子集采样
//!
//! 大后端集合按客户端标识采样到固定大小，约束连接扇出。
//! 同一 selector key 在上游集合不变时始终得到同一子集；
//! 采样前按实例 ID 排序，结果与上游返回顺序无关。

use crate::registry::ServiceInstance;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// 以 selector key 为种子取大小为 `size` 的子集
///
/// `size == 0` 或集合不超过 `size` 时原样返回。
pub fn subset(selector_key: &str, mut instances: Vec<ServiceInstance>, size: usize) -> Vec<ServiceInstance> {
    if size == 0 || instances.len() <= size {
        return instances;
    }
    instances.sort_by(|a, b| a.id.cmp(&b.id));
    let mut hasher = DefaultHasher::new();
    selector_key.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());
    instances.shuffle(&mut rng);
    instances.truncate(size);
    instances
}
