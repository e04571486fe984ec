//! 组控制器工厂模块
//!
//! 提供统一的组控制器创建接口,按组配置中的策略选择器实例化
//! 对应的控制器实现。
//!
//! # 特性
//!
//! - **统一创建接口** - 通过配置动态创建组控制器
//! - **纯函数** - 创建过程不做任何I/O,远端交互全部发生在控制器自身的 `init` 中
//! - **扩展性强** - 新策略只需新增一个实现与一个匹配分支

use std::sync::Arc;

use crate::capacity::PartitionRangeSource;
use crate::config::{ControlStrategy, ThroughputGroupConfig};
use crate::error::AdmissionError;
#[cfg(feature = "global-control")]
use crate::group_controller::GlobalThroughputController;
use crate::group_controller::{LocalThroughputController, ThroughputGroupController};

/// 组控制器工厂
///
/// # 示例
///
/// ```rust
/// use std::sync::Arc;
/// use admitron::capacity::StaticPartitionRanges;
/// use admitron::config::{ControlStrategy, ThroughputGroupConfig, ThroughputShare};
/// use admitron::factory::GroupControllerFactory;
///
/// let config = ThroughputGroupConfig {
///     group_name: "oltp".to_string(),
///     strategy: ControlStrategy::Local,
///     share: ThroughputShare::Absolute { request_units: 400 },
///     use_by_default: true,
///     max_admission_delay_ms: None,
/// };
/// let controller = GroupControllerFactory::create(
///     &config,
///     "host-1",
///     1000,
///     Arc::new(StaticPartitionRanges::single()),
///     "rid-col",
/// )
/// .unwrap();
/// assert_eq!(controller.group_name(), "oltp");
/// ```
pub struct GroupControllerFactory;

impl GroupControllerFactory {
    /// 从组配置创建控制器
    ///
    /// # 参数
    /// - `config`: 吞吐量组配置
    /// - `host_id`: 本进程的稳定主机标识
    /// - `max_container_throughput`: 当前已知的容器吞吐量上限（0 表示未知）
    /// - `partition_ranges`: 分区范围查询协作方
    /// - `container_rid`: 已解析的容器资源标识
    ///
    /// # 返回
    /// - `Ok(Arc<dyn ThroughputGroupController>)`: 创建成功的控制器
    /// - `Err(AdmissionError)`: 额度无法换算或策略不可用
    #[cfg_attr(not(feature = "global-control"), allow(unused_variables))]
    pub fn create(
        config: &ThroughputGroupConfig,
        host_id: &str,
        max_container_throughput: u64,
        partition_ranges: Arc<dyn PartitionRangeSource>,
        container_rid: &str,
    ) -> Result<Arc<dyn ThroughputGroupController>, AdmissionError> {
        match &config.strategy {
            ControlStrategy::Local => Ok(Arc::new(LocalThroughputController::new(
                config,
                max_container_throughput,
            )?)),
            #[cfg(feature = "global-control")]
            ControlStrategy::Global { .. } => Ok(Arc::new(GlobalThroughputController::new(
                config,
                max_container_throughput,
                host_id,
                partition_ranges,
                container_rid,
            )?)),
            #[cfg(not(feature = "global-control"))]
            ControlStrategy::Global { .. } => Err(AdmissionError::ConfigError(format!(
                "吞吐量组[{}]使用全局策略,但编译时未启用 global-control 特性",
                config.group_name
            ))),
        }
    }
}

// ============================================================================
// 单元测试
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::StaticPartitionRanges;
    use crate::config::ThroughputShare;

    fn create(
        config: &ThroughputGroupConfig,
    ) -> Result<Arc<dyn ThroughputGroupController>, AdmissionError> {
        GroupControllerFactory::create(
            config,
            "host-1",
            1000,
            Arc::new(StaticPartitionRanges::single()),
            "rid-col",
        )
    }

    /// 测试创建本地策略控制器
    #[test]
    fn test_create_local_controller() {
        let config = ThroughputGroupConfig {
            group_name: "oltp".to_string(),
            strategy: ControlStrategy::Local,
            share: ThroughputShare::Fraction { ratio: 0.5 },
            use_by_default: true,
            max_admission_delay_ms: None,
        };

        let controller = create(&config).unwrap();
        assert_eq!(controller.group_name(), "oltp");
        assert!(controller.is_use_by_default());
        assert!((controller.group_throughput() - 500.0).abs() < 1e-9);
    }

    /// 测试创建全局策略控制器
    #[cfg(feature = "global-control")]
    #[test]
    fn test_create_global_controller() {
        let config = ThroughputGroupConfig {
            group_name: "batch".to_string(),
            strategy: ControlStrategy::Global {
                load_snapshot_ttl_ms: Some(11_000),
            },
            share: ThroughputShare::Absolute { request_units: 300 },
            use_by_default: false,
            max_admission_delay_ms: Some(2_000),
        };

        let controller = create(&config).unwrap();
        assert_eq!(controller.group_name(), "batch");
        assert!(!controller.is_use_by_default());
        assert!((controller.group_throughput() - 300.0).abs() < 1e-9);
    }

    /// 测试未启用特性时全局策略报配置错误
    #[cfg(not(feature = "global-control"))]
    #[test]
    fn test_global_strategy_requires_feature() {
        let config = ThroughputGroupConfig {
            group_name: "batch".to_string(),
            strategy: ControlStrategy::Global {
                load_snapshot_ttl_ms: None,
            },
            share: ThroughputShare::Absolute { request_units: 300 },
            use_by_default: false,
            max_admission_delay_ms: None,
        };

        let err = create(&config).unwrap_err();
        assert!(err.is_config_error());
    }

    /// 测试额度换算失败从工厂传播
    #[test]
    fn test_unresolvable_fraction_propagates() {
        let config = ThroughputGroupConfig {
            group_name: "oltp".to_string(),
            strategy: ControlStrategy::Local,
            share: ThroughputShare::Fraction { ratio: 0.5 },
            use_by_default: false,
            max_admission_delay_ms: None,
        };

        let err = GroupControllerFactory::create(
            &config,
            "host-1",
            0,
            Arc::new(StaticPartitionRanges::single()),
            "rid-col",
        )
        .unwrap_err();
        assert!(err.is_config_error());
    }
}
