//! 测试通用工具模块
//!
//! 提供准入控制测试中常用的配置构造、脚本化容量解析器与
//! 请求辅助函数。

use admitron::{
    capacity::{MockCapacityResolver, OfferScript, StaticPartitionRanges, ThroughputOffer},
    config::{ControlStrategy, ThroughputControlConfig, ThroughputGroupConfig, ThroughputShare},
    container_controller::ThroughputContainerController,
    error::AdmissionError,
    request::RequestChargeReport,
};
use std::sync::Arc;

/// 测试中作为下一阶段错误使用的包装类型
#[derive(Debug)]
pub enum TestCallError {
    Admission(AdmissionError),
    Upstream(String),
}

impl TestCallError {
    /// 是否为预算耗尽拒绝
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(
            self,
            TestCallError::Admission(AdmissionError::GroupBudgetExhausted { .. })
        )
    }
}

impl From<AdmissionError> for TestCallError {
    fn from(e: AdmissionError) -> Self {
        TestCallError::Admission(e)
    }
}

impl RequestChargeReport for TestCallError {
    fn request_charge(&self) -> f64 {
        0.0
    }

    fn is_throttled(&self) -> bool {
        self.is_budget_exhausted()
    }
}

/// 创建本地策略的组配置,等待上限为0（立即硬拒绝）
pub fn local_group(
    name: &str,
    share: ThroughputShare,
    use_by_default: bool,
) -> ThroughputGroupConfig {
    ThroughputGroupConfig {
        group_name: name.to_string(),
        strategy: ControlStrategy::Local,
        share,
        use_by_default,
        max_admission_delay_ms: Some(0),
    }
}

/// 创建固定额度
pub fn absolute(request_units: u64) -> ThroughputShare {
    ThroughputShare::Absolute { request_units }
}

/// 创建比例额度
pub fn fraction(ratio: f64) -> ThroughputShare {
    ThroughputShare::Fraction { ratio }
}

/// 创建容器配置
pub fn container_config(
    container_name: &str,
    groups: Vec<ThroughputGroupConfig>,
) -> ThroughputControlConfig {
    ThroughputControlConfig {
        container_name: container_name.to_string(),
        refresh_interval_ms: None,
        host_id: Some("host-test".to_string()),
        groups,
    }
}

/// 创建脚本化解析器,容器作用域直接给出手动报价
pub fn resolver_with_offer(
    container_rid: &str,
    database_rid: &str,
    max_throughput: u64,
) -> Arc<MockCapacityResolver> {
    let resolver = MockCapacityResolver::new(container_rid, database_rid);
    resolver.script_offer(
        container_rid,
        OfferScript::Offer(ThroughputOffer::manual(max_throughput)),
    );
    Arc::new(resolver)
}

/// 构造控制器（未初始化）
pub fn build_controller(
    config: ThroughputControlConfig,
    resolver: Arc<MockCapacityResolver>,
) -> Arc<ThroughputContainerController> {
    Arc::new(
        ThroughputContainerController::new(
            config,
            resolver,
            Arc::new(StaticPartitionRanges::single()),
        )
        .expect("控制器构造失败"),
    )
}

/// 构造并初始化控制器
pub async fn ready_controller(
    config: ThroughputControlConfig,
    resolver: Arc<MockCapacityResolver>,
) -> Arc<ThroughputContainerController> {
    let controller = build_controller(config, resolver);
    controller.init().await.expect("控制器初始化失败");
    controller
}
