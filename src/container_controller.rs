//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 容器吞吐量控制器模块
//!
//! 每个容器一个实例:解析容器与数据库的资源身份及容量报价,
//! 持有全部组控制器,按标签把请求路由到对应的组,并驱动周期性的
//! 容量刷新循环。未命中任何组且没有默认组的请求直通放行。

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::capacity::{
    CapacityResolver, MaxContainerThroughput, PartitionRangeSource, ResolvedIdentity,
    ThroughputOffer, ThroughputResolveLevel,
};
use crate::config::{ThroughputControlConfig, ThroughputGroupConfig};
use crate::constants::MIN_REFRESH_INTERVAL_MS;
use crate::error::AdmissionError;
use crate::factory::GroupControllerFactory;
#[cfg(feature = "global-control")]
use crate::group_controller::ClientLoadSnapshot;
use crate::registry::GroupControllerRegistry;
use crate::request::{RequestChargeReport, RequestContext, RequestOutcome};

/// 控制器诊断快照
#[derive(Debug, Clone)]
pub struct ControllerSnapshot {
    /// 容器名称
    pub container_name: String,
    /// 解析到的资源身份
    pub resolved_identity: Option<ResolvedIdentity>,
    /// 当前解析作用域
    pub resolve_level: ThroughputResolveLevel,
    /// 当前容器吞吐量上限
    pub max_container_throughput: u64,
    /// 每个组当前的吞吐量分配
    pub group_throughput: Vec<(String, f64)>,
}

/// 初始化与刷新循环共享的控制器内核
struct ControllerCore {
    /// 目标容器名称
    container_name: String,
    /// 容量解析协作方
    resolver: Arc<dyn CapacityResolver>,
    /// 分区范围查询协作方
    partition_ranges: Arc<dyn PartitionRangeSource>,
    /// 解析到的资源身份,初始化时写入一次,之后只读
    identity: parking_lot::RwLock<Option<ResolvedIdentity>>,
    /// 共享的容器吞吐量上限
    max_throughput: MaxContainerThroughput,
    /// 当前解析作用域,粘性
    resolve_level: parking_lot::RwLock<ThroughputResolveLevel>,
    /// 组控制器注册表
    registry: GroupControllerRegistry,
    /// 容量刷新周期
    refresh_interval: Duration,
    /// 刷新循环运行标志
    running: RwLock<bool>,
    /// 刷新循环停止信号,打断周期睡眠
    stop_signal: Notify,
    /// 关闭标志
    closed: AtomicBool,
}

impl ControllerCore {
    /// 解析当前容量报价
    ///
    /// 在当前作用域查询报价;遇到"该资源无报价"这一特定失败时
    /// 切换作用域并重试一次,切换后的作用域保持粘性。其余失败
    /// 原样传播,上限保持最后一次成功的值。作用域为无需解析时
    /// 直接返回。
    async fn resolve_provisioned_throughput(&self) -> Result<(), AdmissionError> {
        let level = *self.resolve_level.read();
        if level == ThroughputResolveLevel::NoResolve {
            return Ok(());
        }

        let identity = match self.identity.read().clone() {
            Some(identity) => identity,
            None => {
                return Err(AdmissionError::InternalError(
                    "资源身份尚未解析".to_string(),
                ))
            }
        };

        let resource_id = Self::resource_id_at(&identity, level);
        match self.resolver.read_offer(resource_id).await {
            Ok(offer) => {
                self.record_offer(&offer, level);
                Ok(())
            }
            Err(e) if e.is_offer_not_configured() => {
                let flipped = level.flipped();
                warn!(
                    resource_id = %resource_id,
                    next_level = ?flipped,
                    "当前作用域无报价,切换作用域重试"
                );
                *self.resolve_level.write() = flipped;

                let retry_id = Self::resource_id_at(&identity, flipped);
                let offer = self.resolver.read_offer(retry_id).await?;
                self.record_offer(&offer, flipped);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn resource_id_at(identity: &ResolvedIdentity, level: ThroughputResolveLevel) -> &str {
        match level {
            ThroughputResolveLevel::Database => &identity.database_rid,
            _ => &identity.container_rid,
        }
    }

    /// 记录解析到的报价
    fn record_offer(&self, offer: &ThroughputOffer, level: ThroughputResolveLevel) {
        let max = offer.max_throughput();
        self.max_throughput.set(max);
        info!(
            container = %self.container_name,
            max_throughput = max,
            level = ?level,
            "已解析容器吞吐量上限"
        );
    }

    /// 执行一轮刷新:解析报价、同步分区范围、广播新上限
    async fn refresh_once(&self) -> Result<(), AdmissionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if *self.resolve_level.read() == ThroughputResolveLevel::NoResolve {
            return Ok(());
        }

        self.resolve_provisioned_throughput().await?;

        let identity = self.identity.read().clone();
        if let Some(identity) = identity {
            match self.partition_ranges.range_ids(&identity.container_rid).await {
                Ok(ranges) => self.registry.sync_partition_ranges(&ranges),
                Err(e) => {
                    warn!(
                        container = %self.container_name,
                        error = %e,
                        "分区范围查询失败,跳过本轮同步"
                    );
                }
            }
        }

        self.registry
            .broadcast_max_throughput(self.max_throughput.get());
        Ok(())
    }

    /// 后台刷新循环
    ///
    /// 每次睡醒后检查运行标志;睡眠期间响应停止信号。资源已被
    /// 删除时关闭整个控制器,其余失败记录后继续。
    async fn run_refresh_loop(self: Arc<Self>) {
        info!(
            container = %self.container_name,
            interval_ms = self.refresh_interval.as_millis() as u64,
            "容量刷新循环已启动"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.refresh_interval) => {}
                _ = self.stop_signal.notified() => {}
            }

            if !*self.running.read().await {
                break;
            }

            if let Err(e) = self.refresh_once().await {
                if e.is_resource_gone() {
                    error!(
                        container = %self.container_name,
                        error = %e,
                        "目标资源已不存在,关闭容器控制器"
                    );
                    self.close().await;
                    break;
                }
                warn!(
                    container = %self.container_name,
                    error = %e,
                    "容量刷新失败,保留现有上限"
                );
            }
        }

        debug!(container = %self.container_name, "容量刷新循环已退出");
    }

    /// 关闭内核:停止刷新循环并级联关闭全部组控制器,幂等
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        *self.running.write().await = false;
        self.stop_signal.notify_waiters();
        self.registry.close_all().await;

        info!(container = %self.container_name, "容器吞吐量控制器已关闭");
    }
}

/// 容器吞吐量控制器
///
/// 通过 [`Arc`] 共享;`init` 成功返回之后才能处理请求。
pub struct ThroughputContainerController {
    /// 本进程主机标识
    host_id: String,
    /// 静态组配置
    group_configs: Vec<ThroughputGroupConfig>,
    /// 初始化是否已执行
    initialized: AtomicBool,
    core: Arc<ControllerCore>,
}

impl ThroughputContainerController {
    /// 依据配置与协作方构造控制器
    ///
    /// 组列表为空、主机标识为空白或任一组配置无效时立即失败;
    /// 初始解析作用域由组配置决定:只要有组按比例分配,就从容器
    /// 作用域开始,全部为绝对额度时跳过远端解析。
    pub fn new(
        config: ThroughputControlConfig,
        resolver: Arc<dyn CapacityResolver>,
        partition_ranges: Arc<dyn PartitionRangeSource>,
    ) -> Result<Self, AdmissionError> {
        if config.groups.is_empty() {
            return Err(AdmissionError::ConfigError(
                "至少需要一个吞吐量组".to_string(),
            ));
        }

        let host_id = config.resolved_host_id();
        if host_id.trim().is_empty() {
            return Err(AdmissionError::ConfigError(
                "主机标识不能为空白".to_string(),
            ));
        }

        if let Some(interval) = config.refresh_interval_ms {
            if interval < MIN_REFRESH_INTERVAL_MS {
                return Err(AdmissionError::ConfigError(format!(
                    "刷新周期过短: {}ms,最小 {}ms",
                    interval, MIN_REFRESH_INTERVAL_MS
                )));
            }
        }

        for group in &config.groups {
            group.validate().map_err(|e| {
                AdmissionError::ConfigError(format!(
                    "吞吐量组[{}]配置无效: {}",
                    group.group_name, e
                ))
            })?;
        }

        let initial_level = if config.requires_remote_ceiling() {
            ThroughputResolveLevel::Container
        } else {
            ThroughputResolveLevel::NoResolve
        };

        let refresh_interval = config.resolved_refresh_interval();

        Ok(Self {
            host_id,
            group_configs: config.groups,
            initialized: AtomicBool::new(false),
            core: Arc::new(ControllerCore {
                container_name: config.container_name,
                resolver,
                partition_ranges,
                identity: parking_lot::RwLock::new(None),
                max_throughput: MaxContainerThroughput::new(),
                resolve_level: parking_lot::RwLock::new(initial_level),
                registry: GroupControllerRegistry::new(),
                refresh_interval,
                running: RwLock::new(false),
                stop_signal: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// 初始化控制器
    ///
    /// 依次解析容器与数据库资源身份、解析容量报价、构建并初始化
    /// 全部组控制器,最后启动后台刷新循环。任一步骤失败时整个
    /// 控制器转入关闭状态,调用方应重新构造;不支持重复初始化。
    #[instrument(skip(self), fields(container = %self.core.container_name))]
    pub async fn init(&self) -> Result<(), AdmissionError> {
        if self.core.closed.load(Ordering::SeqCst) {
            return Err(AdmissionError::ControllerClosed(
                self.core.container_name.clone(),
            ));
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(AdmissionError::ConfigError(
                "容器控制器不支持重复初始化".to_string(),
            ));
        }

        if let Err(e) = self.init_inner().await {
            // 初始化中途失败不留下半可用的控制器
            self.core.close().await;
            return Err(e);
        }
        Ok(())
    }

    async fn init_inner(&self) -> Result<(), AdmissionError> {
        let container_rid = self.core.resolver.resolve_container_resource_id().await?;
        let database_rid = self.core.resolver.resolve_database_resource_id().await?;
        *self.core.identity.write() = Some(ResolvedIdentity {
            container_rid: container_rid.clone(),
            database_rid,
        });

        self.core.resolve_provisioned_throughput().await?;

        for group_config in &self.group_configs {
            let controller = GroupControllerFactory::create(
                group_config,
                &self.host_id,
                self.core.max_throughput.get(),
                Arc::clone(&self.core.partition_ranges),
                &container_rid,
            )?;
            self.core.registry.register(Arc::clone(&controller))?;
            controller.init().await?;
        }

        *self.core.running.write().await = true;
        let core = Arc::clone(&self.core);
        tokio::spawn(core.run_refresh_loop());

        info!(
            host_id = %self.host_id,
            groups = self.core.registry.len(),
            max_throughput = self.core.max_throughput.get(),
            level = ?*self.core.resolve_level.read(),
            "容器吞吐量控制器初始化完成"
        );
        Ok(())
    }

    /// 处理一个请求
    ///
    /// 按请求标签查找组控制器,匹配不到时落到默认组;没有默认组
    /// 时直接调用 `next_stage`,不做任何延迟与记账。命中组时先
    /// 申请准入（可能在内部等待或拒绝）,准入后调用 `next_stage`
    /// 恰好一次,按其结果报告的实际费用记账,结果原样返回。
    pub async fn process_request<T, E, F, Fut>(
        &self,
        request: &RequestContext,
        next_stage: F,
    ) -> Result<T, E>
    where
        T: RequestChargeReport,
        E: RequestChargeReport + From<AdmissionError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.core.closed.load(Ordering::SeqCst) {
            return Err(E::from(AdmissionError::ControllerClosed(
                self.core.container_name.clone(),
            )));
        }
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(E::from(AdmissionError::InternalError(
                "容器控制器尚未初始化".to_string(),
            )));
        }

        let controller = match self.core.registry.route(request.group_tag.as_deref()) {
            Some(controller) => controller,
            None => {
                debug!(
                    request_id = %request.request_id,
                    group_tag = ?request.group_tag,
                    "请求未命中任何吞吐量组,直通放行"
                );
                return next_stage().await;
            }
        };

        controller.acquire_permit(request).await.map_err(E::from)?;

        let result = next_stage().await;
        let outcome = match &result {
            Ok(value) => RequestOutcome::from_success(value),
            Err(error) => RequestOutcome::from_failure(error),
        };
        controller.record_outcome(&outcome);

        result
    }

    /// 解析当前容量报价
    ///
    /// 初始化路径之外手动触发一次作用域解析,语义与刷新循环中的
    /// 解析步骤一致。
    #[instrument(skip(self), fields(container = %self.core.container_name))]
    pub async fn resolve_provisioned_throughput(&self) -> Result<(), AdmissionError> {
        self.core.resolve_provisioned_throughput().await
    }

    /// 手动触发一次刷新
    ///
    /// 与后台循环的周期刷新等价:解析报价、同步分区范围并向
    /// 全部组控制器广播新上限。
    #[instrument(skip(self), fields(container = %self.core.container_name))]
    pub async fn refresh_now(&self) -> Result<(), AdmissionError> {
        self.core.refresh_once().await
    }

    /// 关闭控制器
    ///
    /// 幂等;停止刷新循环并关闭每一个组控制器,单个组的关闭
    /// 失败不影响其余组。
    #[instrument(skip(self), fields(container = %self.core.container_name))]
    pub async fn close(&self) {
        self.core.close().await;
    }

    /// 本控制器是否负责该请求
    ///
    /// 以请求携带的集合资源标识与已解析的容器资源标识相等为准。
    pub fn can_handle_request(&self, request: &RequestContext) -> bool {
        match (&request.collection_rid, self.core.identity.read().as_ref()) {
            (Some(rid), Some(identity)) => *rid == identity.container_rid,
            _ => false,
        }
    }

    /// 向指定组注入一份客户端负载快照
    #[cfg(feature = "global-control")]
    pub fn ingest_load_snapshot(
        &self,
        group_name: &str,
        snapshot: ClientLoadSnapshot,
    ) -> Result<(), AdmissionError> {
        match self.core.registry.lookup(group_name) {
            Some(controller) => {
                controller.ingest_load_snapshot(snapshot);
                Ok(())
            }
            None => Err(AdmissionError::ConfigError(format!(
                "吞吐量组不存在: {}",
                group_name
            ))),
        }
    }

    /// 容器名称
    pub fn container_name(&self) -> &str {
        &self.core.container_name
    }

    /// 本进程主机标识
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// 当前容器吞吐量上限
    pub fn max_container_throughput(&self) -> u64 {
        self.core.max_throughput.get()
    }

    /// 当前解析作用域
    pub fn resolve_level(&self) -> ThroughputResolveLevel {
        *self.core.resolve_level.read()
    }

    /// 控制器是否已关闭
    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }

    /// 采集诊断快照
    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            container_name: self.core.container_name.clone(),
            resolved_identity: self.core.identity.read().clone(),
            resolve_level: *self.core.resolve_level.read(),
            max_container_throughput: self.core.max_throughput.get(),
            group_throughput: self.core.registry.throughput_by_group(),
        }
    }
}

// ============================================================================
// 单元测试
// ============================================================================
