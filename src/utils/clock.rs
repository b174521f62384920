//! 单调时钟
//!
//! EWMA 统计需要可做整数运算的单调纳秒时间戳，
//! 以进程启动时刻为原点换算 `Instant`。

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// 自进程时钟原点以来的纳秒数
pub fn now_nanos() -> i64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as i64
}
