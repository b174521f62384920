//! EWMA 加权节点
//!
//! 在客户端侧为每个后端维护衰减平均延迟、成功率与在途请求数，
//! 据此计算实时有效权重。全部统计用原子读写与 CAS 维护，
//! 字段间允许短暂不一致以换取无锁。p2c 均衡器使用这种节点。

use crate::error::Error;
use crate::selector::{DoneFunc, DoneInfo, Node, WeightedNode, WeightedNodeBuilder};
use crate::transport::CallContext;
use crate::utils::clock::now_nanos;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 平均成本的生命周期；按 `exp(-Δt/τ)` 衰减，半衰期 ≈ τ·ln2 ≈ 416ms
const TAU: i64 = 600 * 1_000_000;
/// 没有任何统计时按在途请求数施加的延迟惩罚（纳秒）
const PENALTY: u64 = 100 * 1_000;
/// 权重缓存有效期（纳秒）
const WEIGHT_CACHE: i64 = 5 * 1_000_000;
/// 在途请求时间戳环的槽位数
const INFLIGHT_SLOTS: usize = 200;

/// 自定义错误分类函数，返回 true 表示计为服务端错误
pub type ErrHandler = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// 客户端统计数据，被节点与完成回调共享
struct Stats {
    /// 平均延迟（纳秒）
    lag: AtomicI64,
    /// 成功率，千分制
    success: AtomicU64,
    /// 在途请求数
    inflight: AtomicI64,
    /// 在途请求开始时间戳环
    inflights: [AtomicI64; INFLIGHT_SLOTS],
    /// 上次统计更新时间戳
    stamp: AtomicI64,
    /// 累计请求数
    reqs: AtomicI64,
    /// 上次被选中时间戳
    last_pick: AtomicI64,
    /// 缓存的权重（f64 位模式）与缓存时间
    cached_weight: AtomicU64,
    weight_updated_at: AtomicI64,
}

impl Stats {
    fn new() -> Self {
        Self {
            lag: AtomicI64::new(0),
            success: AtomicU64::new(1000),
            inflight: AtomicI64::new(1),
            inflights: std::array::from_fn(|_| AtomicI64::new(0)),
            stamp: AtomicI64::new(0),
            reqs: AtomicI64::new(0),
            last_pick: AtomicI64::new(0),
            cached_weight: AtomicU64::new(0),
            weight_updated_at: AtomicI64::new(0),
        }
    }
}

/// EWMA 节点
pub struct EwmaNode {
    node: Node,
    stats: Arc<Stats>,
    err_handler: Option<ErrHandler>,
}

impl EwmaNode {
    /// 成功率，千分制
    fn health(&self) -> u64 {
        self.stats.success.load(Ordering::Acquire)
    }

    /// 预测下一个请求的延迟
    ///
    /// 扫描在途请求环，超过半数比平均延迟还慢时取慢请求的平均滞留时间。
    fn predict(&self, avg_lag: i64, now: i64) -> i64 {
        let mut total: i64 = 0;
        let mut slow_num = 0usize;
        let mut total_num = 0usize;
        for slot in &self.stats.inflights {
            let start = slot.load(Ordering::Acquire);
            if start != 0 {
                total_num += 1;
                let lag = now - start;
                if lag > avg_lag {
                    slow_num += 1;
                    total += lag;
                }
            }
        }
        if slow_num >= total_num / 2 + 1 {
            total / slow_num as i64
        } else {
            0
        }
    }

    /// 节点负载
    fn load(&self) -> u64 {
        let now = now_nanos();
        let avg_lag = self.stats.lag.load(Ordering::Acquire);
        let inflight = self.stats.inflight.load(Ordering::Acquire).max(1) as u64;
        if avg_lag == 0 {
            // 尚无统计数据，用惩罚值抬高负载
            return PENALTY * inflight;
        }
        let predict = self.predict(avg_lag, now);
        let mut lag = avg_lag.max(predict);
        // 加 5ms 抹平不同机房间的延迟差异
        lag += 5 * 1_000_000;
        (f64::sqrt(lag as f64) as u64) * inflight
    }
}

impl WeightedNode for EwmaNode {
    fn raw(&self) -> &Node {
        &self.node
    }

    fn weight(&self) -> f64 {
        let now = now_nanos();
        let updated_at = self.stats.weight_updated_at.load(Ordering::Acquire);
        if updated_at != 0 && now - updated_at <= WEIGHT_CACHE {
            return f64::from_bits(self.stats.cached_weight.load(Ordering::Acquire));
        }
        let weight = (self.health() * 10_000) as f64 / self.load() as f64;
        self.stats.cached_weight.store(weight.to_bits(), Ordering::Release);
        self.stats.weight_updated_at.store(now, Ordering::Release);
        weight
    }

    fn pick(&self) -> DoneFunc {
        let start = now_nanos();
        let stats = self.stats.clone();
        stats.last_pick.store(start, Ordering::Release);
        stats.inflight.fetch_add(1, Ordering::AcqRel);
        let reqs = stats.reqs.fetch_add(1, Ordering::Relaxed) + 1;
        let slot = (reqs % INFLIGHT_SLOTS as i64) as usize;
        let claimed = stats.inflights[slot]
            .compare_exchange(0, start, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok();
        let err_handler = self.err_handler.clone();

        Box::new(move |_ctx: &CallContext, info: DoneInfo| {
            if claimed {
                let _ = stats.inflights[slot].compare_exchange(
                    start,
                    0,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
            }
            stats.inflight.fetch_sub(1, Ordering::AcqRel);

            let now = now_nanos();
            let stamp = stats.stamp.swap(now, Ordering::AcqRel);
            let td = (now - stamp).max(0);
            let mut w = f64::exp(-(td as f64) / TAU as f64);

            let lag = (now - start).max(0);
            let old_lag = stats.lag.load(Ordering::Acquire);
            if old_lag == 0 {
                // 首个样本直接作为基线
                w = 0.0;
            }
            let new_lag = old_lag as f64 * w + lag as f64 * (1.0 - w);
            stats.lag.store(new_lag as i64, Ordering::Release);

            let mut sample: u64 = 1000;
            if let Some(err) = &info.err {
                let custom = err_handler.as_ref().map(|h| h(err)).unwrap_or(false);
                // 服务端错误：取消/超时/不可用/网关超时/网络错误
                if custom
                    || err.is_client_closed()
                    || err.is_service_unavailable()
                    || err.is_gateway_timeout()
                    || err.has_io_cause()
                {
                    sample = 0;
                }
            }
            let old_success = stats.success.load(Ordering::Acquire);
            let new_success = old_success as f64 * w + sample as f64 * (1.0 - w);
            stats.success.store(new_success as u64, Ordering::Release);
        })
    }

    fn pick_elapsed(&self) -> Duration {
        let elapsed = now_nanos() - self.stats.last_pick.load(Ordering::Acquire);
        Duration::from_nanos(elapsed.max(0) as u64)
    }
}

/// EWMA 节点构建器
#[derive(Default)]
pub struct EwmaNodeBuilder {
    /// 自定义错误分类函数
    pub err_handler: Option<ErrHandler>,
}

impl WeightedNodeBuilder for EwmaNodeBuilder {
    fn build(&self, node: Node) -> Arc<dyn WeightedNode> {
        Arc::new(EwmaNode {
            node,
            stats: Arc::new(Stats::new()),
            err_handler: self.err_handler.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CallContext;

    fn ewma_node() -> Arc<dyn WeightedNode> {
        EwmaNodeBuilder::default().build(Node::direct("http", "127.0.0.1:9000"))
    }

    #[tokio::test]
    async fn test_success_drops_on_server_side_error_and_recovers() {
        let node = ewma_node();
        let ctx = CallContext::background();

        let done = node.pick();
        tokio::time::sleep(Duration::from_millis(5)).await;
        done(
            &ctx,
            DoneInfo {
                err: Some(Error::service_unavailable("UPSTREAM_DOWN", "")),
                ..Default::default()
            },
        );
        let degraded = node.weight();

        // 大量成功调用后成功率回到 1000 附近，权重回升
        for _ in 0..64 {
            let done = node.pick();
            tokio::time::sleep(Duration::from_millis(1)).await;
            done(&ctx, DoneInfo::default());
        }
        tokio::time::sleep(Duration::from_millis(6)).await;
        assert!(node.weight() > degraded);
    }

    #[tokio::test]
    async fn test_done_decrements_inflight_exactly_once() {
        let node = ewma_node();
        let ctx = CallContext::background();
        let d1 = node.pick();
        let d2 = node.pick();
        d1(&ctx, DoneInfo::default());
        d2(&ctx, DoneInfo::default());
        // inflight 回到初始值 1：负载退化为 sqrt(lag+5ms)·1
        let w1 = {
            tokio::time::sleep(Duration::from_millis(6)).await;
            node.weight()
        };
        assert!(w1.is_finite() && w1 > 0.0);
    }

    #[tokio::test]
    async fn test_client_fixable_error_keeps_success() {
        let node = ewma_node();
        let ctx = CallContext::background();
        // 建立基线
        let done = node.pick();
        done(&ctx, DoneInfo::default());
        // BadRequest 不计为服务端错误
        for _ in 0..8 {
            let done = node.pick();
            done(
                &ctx,
                DoneInfo {
                    err: Some(Error::bad_request("INVALID_ARG", "")),
                    ..Default::default()
                },
            );
        }
        tokio::time::sleep(Duration::from_millis(6)).await;
        let weight = node.weight();
        // 成功率仍应接近千分之一千
        assert!(weight > 0.0);
        let node2 = ewma_node();
        let done = node2.pick();
        done(&ctx, DoneInfo::default());
        for _ in 0..8 {
            let done = node2.pick();
            done(
                &ctx,
                DoneInfo {
                    err: Some(Error::gateway_timeout("UPSTREAM_TIMEOUT", "")),
                    ..Default::default()
                },
            );
        }
        tokio::time::sleep(Duration::from_millis(6)).await;
        assert!(weight > node2.weight());
    }

    #[tokio::test]
    async fn test_failure_penalty_scenario() {
        // 单节点顺序 5 次调用：首次成功，随后 4 次 DeadlineExceeded，每次约 20ms。
        // 最终权重应落在 (1000, 2000)：低于满成功率水平但仍为正。
        let node = ewma_node();
        let ctx = CallContext::background();
        for i in 0..5 {
            let done = node.pick();
            tokio::time::sleep(Duration::from_millis(20)).await;
            let err = if i == 0 {
                None
            } else {
                Some(Error::gateway_timeout("DEADLINE_EXCEEDED", "context deadline exceeded"))
            };
            done(&ctx, DoneInfo { err, ..Default::default() });
        }
        tokio::time::sleep(Duration::from_millis(6)).await;
        let weight = node.weight();
        assert!(weight > 1000.0, "weight = {}", weight);
        assert!(weight < 2000.0, "weight = {}", weight);
    }
}
