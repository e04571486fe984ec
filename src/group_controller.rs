//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 吞吐量组控制器模块
//!
//! 定义组控制器的统一接口与两种具体策略:本地估算策略只依据
//! 本进程观测到的消耗记账;全局协调策略额外按服务端下发的
//! 各客户端负载快照折算本进程的公平份额。

use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "global-control")]
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

#[cfg(feature = "global-control")]
use ahash::AHashSet as HashSet;
#[cfg(feature = "global-control")]
use chrono::{DateTime, Utc};
#[cfg(feature = "global-control")]
use dashmap::DashMap;
#[cfg(feature = "global-control")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "global-control")]
use crate::capacity::PartitionRangeSource;
#[cfg(feature = "global-control")]
use crate::config::ControlStrategy;
use crate::config::{ThroughputGroupConfig, ThroughputShare};
use crate::constants::MIN_ABSOLUTE_THROUGHPUT;
#[cfg(feature = "global-control")]
use crate::constants::{
    DEFAULT_INITIAL_LOAD_FACTOR, DEFAULT_LOAD_SNAPSHOT_TTL_SECS, MAX_THROUGHPUT_FRACTION,
    MIN_THROUGHPUT_FRACTION,
};
use crate::error::AdmissionError;
use crate::request::{PermitGrant, RequestContext, RequestOutcome};
use crate::throttler::RequestThrottler;

/// 客户端负载快照
///
/// 由带外同步通道下发,描述某个客户端在某个分区范围上观测到的
/// 负载因子。全局策略据此计算本进程的公平份额。
#[cfg(feature = "global-control")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientLoadSnapshot {
    /// 客户端标识
    pub client_id: String,
    /// 分区范围标识
    pub partition_range_id: String,
    /// 负载因子,非负
    pub load_factor: f64,
    /// 记录时间,超过存活时长后失效
    pub recorded_at: DateTime<Utc>,
}

#[cfg(feature = "global-control")]
impl ClientLoadSnapshot {
    /// 以当前时间创建快照
    pub fn new(
        client_id: impl Into<String>,
        partition_range_id: impl Into<String>,
        load_factor: f64,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            partition_range_id: partition_range_id.into(),
            load_factor,
            recorded_at: Utc::now(),
        }
    }
}

/// 吞吐量组控制器接口
///
/// 所有策略共享同一接口,容器控制器对具体策略无感知。
/// 准入包装被拆分为两个对象安全的原语:`acquire_permit` 决策
/// 并在内部完成等待,`record_outcome` 在后续阶段完成后按实际
/// 费用记账;泛型组合由容器控制器提供。
#[async_trait]
pub trait ThroughputGroupController: Send + Sync {
    /// 初始化控制器,在接收流量之前调用一次
    async fn init(&self) -> Result<(), AdmissionError>;

    /// 申请准入
    ///
    /// 立即放行、内部等待后放行或拒绝;等待由控制器自身完成,
    /// 不会把延迟交给调用方处理。
    async fn acquire_permit(
        &self,
        request: &RequestContext,
    ) -> Result<PermitGrant, AdmissionError>;

    /// 按实际消耗的费用记账
    ///
    /// 在后续阶段返回（无论成败）之后调用。
    fn record_outcome(&self, outcome: &RequestOutcome);

    /// 容器吞吐量上限刷新通知
    ///
    /// 按配置的额度重新计算本组预算;与在途准入调用并发安全。
    fn on_max_throughput_refresh(&self, max_container_throughput: u64);

    /// 同步存活的分区范围,丢弃已失效范围上的负载快照
    fn sync_partition_ranges(&self, _live_range_ids: &[String]) {}

    /// 注入一份客户端负载快照
    #[cfg(feature = "global-control")]
    fn ingest_load_snapshot(&self, _snapshot: ClientLoadSnapshot) {}

    /// 组名称
    fn group_name(&self) -> &str;

    /// 是否为缺省回退组
    fn is_use_by_default(&self) -> bool;

    /// 当前分配给本进程的组吞吐量（请求单位/周期）
    fn group_throughput(&self) -> f64;

    /// 关闭控制器,幂等
    async fn close(&self);
}

impl std::fmt::Debug for dyn ThroughputGroupController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThroughputGroupController")
            .field("group_name", &self.group_name())
            .finish()
    }
}

/// 按额度与当前容器上限换算组预算
///
/// 比例额度要求上限已知,否则报配置错误。
fn resolve_group_throughput(
    share: &ThroughputShare,
    max_container_throughput: u64,
    group_name: &str,
) -> Result<f64, AdmissionError> {
    match share.resolve(max_container_throughput) {
        Some(value) => Ok(value.max(MIN_ABSOLUTE_THROUGHPUT as f64)),
        None => Err(AdmissionError::ConfigError(format!(
            "吞吐量组[{}]使用比例额度,但容器吞吐量上限未知",
            group_name
        ))),
    }
}

/// 本地估算策略
///
/// 只依据本进程观测到的实际费用对本组预算记账,
/// 不感知其他客户端的存在。
#[derive(Debug)]
pub struct LocalThroughputController {
    group_name: String,
    use_by_default: bool,
    share: ThroughputShare,
    throttler: RequestThrottler,
    closed: AtomicBool,
}

impl LocalThroughputController {
    /// 依据组配置与当前容器上限构造控制器
    ///
    /// 比例额度在上限未知时返回 [`AdmissionError::ConfigError`]。
    pub fn new(
        config: &ThroughputGroupConfig,
        max_container_throughput: u64,
    ) -> Result<Self, AdmissionError> {
        let scheduled = resolve_group_throughput(
            &config.share,
            max_container_throughput,
            &config.group_name,
        )?;
        let max_delay = config.max_admission_delay_ms.map(Duration::from_millis);

        Ok(Self {
            group_name: config.group_name.clone(),
            use_by_default: config.use_by_default,
            share: config.share.clone(),
            throttler: RequestThrottler::new(&config.group_name, scheduled, max_delay),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ThroughputGroupController for LocalThroughputController {
    async fn init(&self) -> Result<(), AdmissionError> {
        tracing::info!(
            group = %self.group_name,
            throughput = self.throttler.scheduled_throughput(),
            strategy = "local",
            "吞吐量组控制器已初始化"
        );
        Ok(())
    }

    async fn acquire_permit(
        &self,
        request: &RequestContext,
    ) -> Result<PermitGrant, AdmissionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdmissionError::ControllerClosed(self.group_name.clone()));
        }

        tracing::debug!(
            request_id = %request.request_id,
            group = %self.group_name,
            "申请吞吐量准入"
        );
        self.throttler.acquire().await
    }

    fn record_outcome(&self, outcome: &RequestOutcome) {
        if outcome.throttled {
            self.throttler.record_throttled();
        }
        self.throttler.record_charge(outcome.request_charge);
    }

    fn on_max_throughput_refresh(&self, max_container_throughput: u64) {
        match self.share.resolve(max_container_throughput) {
            Some(value) => {
                self.throttler
                    .update_scheduled_throughput(value.max(MIN_ABSOLUTE_THROUGHPUT as f64));
            }
            None => {
                tracing::warn!(
                    group = %self.group_name,
                    "刷新到的容器吞吐量上限为0,保留现有预算"
                );
            }
        }
    }

    fn group_name(&self) -> &str {
        &self.group_name
    }

    fn is_use_by_default(&self) -> bool {
        self.use_by_default
    }

    fn group_throughput(&self) -> f64 {
        self.throttler.scheduled_throughput()
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!(group = %self.group_name, "吞吐量组控制器已关闭");
        }
    }
}

/// 全局协调策略
///
/// 组预算先按额度换算,再乘以本进程的公平份额:
/// 份额 = 本进程未过期负载 ÷ 全部未过期负载。没有任何快照时
/// 视本进程为唯一客户端,独占组预算。
#[cfg(feature = "global-control")]
pub struct GlobalThroughputController {
    group_name: String,
    use_by_default: bool,
    share: ThroughputShare,
    host_id: String,
    container_rid: String,
    partition_ranges: Arc<dyn PartitionRangeSource>,
    /// 组整体预算,未按份额折减
    group_quota: parking_lot::Mutex<f64>,
    throttler: RequestThrottler,
    /// 键: `client_id:partition_range_id`
    load_snapshots: DashMap<String, ClientLoadSnapshot>,
    /// 当前存活的分区范围;为空表示拓扑未知,接受全部快照
    live_ranges: parking_lot::RwLock<HashSet<String>>,
    snapshot_ttl: chrono::Duration,
    closed: AtomicBool,
}

#[cfg(feature = "global-control")]
impl GlobalThroughputController {
    /// 依据组配置、当前容器上限与主机标识构造控制器
    ///
    /// 构造本身不做I/O;分区范围在 `init` 中查询。
    pub fn new(
        config: &ThroughputGroupConfig,
        max_container_throughput: u64,
        host_id: impl Into<String>,
        partition_ranges: Arc<dyn PartitionRangeSource>,
        container_rid: impl Into<String>,
    ) -> Result<Self, AdmissionError> {
        let quota = resolve_group_throughput(
            &config.share,
            max_container_throughput,
            &config.group_name,
        )?;

        let ttl_ms = match &config.strategy {
            ControlStrategy::Global {
                load_snapshot_ttl_ms,
            } => load_snapshot_ttl_ms.unwrap_or(DEFAULT_LOAD_SNAPSHOT_TTL_SECS * 1000),
            _ => DEFAULT_LOAD_SNAPSHOT_TTL_SECS * 1000,
        };
        let max_delay = config.max_admission_delay_ms.map(Duration::from_millis);

        Ok(Self {
            group_name: config.group_name.clone(),
            use_by_default: config.use_by_default,
            share: config.share.clone(),
            host_id: host_id.into(),
            container_rid: container_rid.into(),
            partition_ranges,
            group_quota: parking_lot::Mutex::new(quota),
            // 尚无快照,初始按独占预算分配
            throttler: RequestThrottler::new(&config.group_name, quota, max_delay),
            load_snapshots: DashMap::new(),
            live_ranges: parking_lot::RwLock::new(HashSet::new()),
            snapshot_ttl: chrono::Duration::milliseconds(ttl_ms as i64),
            closed: AtomicBool::new(false),
        })
    }

    /// 计算本进程的公平份额
    ///
    /// 本进程尚无快照时以初始负载因子参与分配;过期快照不计入。
    fn fair_fraction(&self) -> f64 {
        let now = Utc::now();
        let mut own_load = 0.0f64;
        let mut total_load = 0.0f64;

        for entry in self.load_snapshots.iter() {
            let snapshot = entry.value();
            if now.signed_duration_since(snapshot.recorded_at) > self.snapshot_ttl {
                continue;
            }
            total_load += snapshot.load_factor;
            if snapshot.client_id == self.host_id {
                own_load += snapshot.load_factor;
            }
        }

        if own_load <= 0.0 {
            own_load = DEFAULT_INITIAL_LOAD_FACTOR;
            total_load += DEFAULT_INITIAL_LOAD_FACTOR;
        }

        (own_load / total_load).clamp(MIN_THROUGHPUT_FRACTION, MAX_THROUGHPUT_FRACTION)
    }

    /// 按最新份额重算本进程的吞吐量分配
    fn refresh_allocation(&self) {
        let fraction = self.fair_fraction();
        let quota = *self.group_quota.lock();
        let allocation = (quota * fraction).max(MIN_ABSOLUTE_THROUGHPUT as f64);

        tracing::debug!(
            group = %self.group_name,
            fraction,
            allocation,
            "已重算公平份额分配"
        );
        self.throttler.update_scheduled_throughput(allocation);
    }

    /// 丢弃已过期的负载快照
    fn prune_expired_snapshots(&self) {
        let now = Utc::now();
        let ttl = self.snapshot_ttl;
        self.load_snapshots
            .retain(|_, snapshot| now.signed_duration_since(snapshot.recorded_at) <= ttl);
    }
}

#[cfg(feature = "global-control")]
#[async_trait]
impl ThroughputGroupController for GlobalThroughputController {
    async fn init(&self) -> Result<(), AdmissionError> {
        let ranges = self.partition_ranges.range_ids(&self.container_rid).await?;
        let range_count = ranges.len();
        *self.live_ranges.write() = ranges.into_iter().collect();

        tracing::info!(
            group = %self.group_name,
            throughput = self.throttler.scheduled_throughput(),
            strategy = "global",
            host_id = %self.host_id,
            container_rid = %self.container_rid,
            partition_ranges = range_count,
            "吞吐量组控制器已初始化"
        );
        Ok(())
    }

    async fn acquire_permit(
        &self,
        request: &RequestContext,
    ) -> Result<PermitGrant, AdmissionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdmissionError::ControllerClosed(self.group_name.clone()));
        }

        tracing::debug!(
            request_id = %request.request_id,
            group = %self.group_name,
            "申请吞吐量准入"
        );
        self.throttler.acquire().await
    }

    fn record_outcome(&self, outcome: &RequestOutcome) {
        if outcome.throttled {
            self.throttler.record_throttled();
        }
        self.throttler.record_charge(outcome.request_charge);
    }

    fn on_max_throughput_refresh(&self, max_container_throughput: u64) {
        match self.share.resolve(max_container_throughput) {
            Some(value) => {
                *self.group_quota.lock() = value.max(MIN_ABSOLUTE_THROUGHPUT as f64);
                self.prune_expired_snapshots();
                self.refresh_allocation();
            }
            None => {
                tracing::warn!(
                    group = %self.group_name,
                    "刷新到的容器吞吐量上限为0,保留现有预算"
                );
            }
        }
    }

    fn sync_partition_ranges(&self, live_range_ids: &[String]) {
        {
            let mut live = self.live_ranges.write();
            live.clear();
            live.extend(live_range_ids.iter().cloned());
        }

        let live = self.live_ranges.read();
        let before = self.load_snapshots.len();
        self.load_snapshots
            .retain(|_, snapshot| live.contains(snapshot.partition_range_id.as_str()));
        drop(live);

        if self.load_snapshots.len() != before {
            tracing::debug!(
                group = %self.group_name,
                dropped = before - self.load_snapshots.len(),
                "已丢弃失效分区范围上的负载快照"
            );
            self.refresh_allocation();
        }
    }

    fn ingest_load_snapshot(&self, snapshot: ClientLoadSnapshot) {
        if !snapshot.load_factor.is_finite() || snapshot.load_factor < 0.0 {
            tracing::warn!(
                group = %self.group_name,
                client_id = %snapshot.client_id,
                load_factor = snapshot.load_factor,
                "负载快照的负载因子非法,已丢弃"
            );
            return;
        }

        {
            let live = self.live_ranges.read();
            if !live.is_empty() && !live.contains(snapshot.partition_range_id.as_str()) {
                tracing::debug!(
                    group = %self.group_name,
                    partition_range_id = %snapshot.partition_range_id,
                    "未知分区范围上的负载快照已丢弃"
                );
                return;
            }
        }

        let key = format!("{}:{}", snapshot.client_id, snapshot.partition_range_id);
        self.load_snapshots.insert(key, snapshot);
        self.refresh_allocation();
    }

    fn group_name(&self) -> &str {
        &self.group_name
    }

    fn is_use_by_default(&self) -> bool {
        self.use_by_default
    }

    fn group_throughput(&self) -> f64 {
        self.throttler.scheduled_throughput()
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.load_snapshots.clear();
            tracing::info!(group = %self.group_name, "吞吐量组控制器已关闭");
        }
    }
}

// ============================================================================
// 单元测试
// ============================================================================
