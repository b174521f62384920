//! 加权节点实现

pub mod direct;
pub mod ewma;
