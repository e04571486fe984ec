//! 组控制器注册表模块
//!
//! 初始化阶段一次性写入,请求分发路径并发只读。注册表同时
//! 持有至多一个默认组的引用,作为无标签或未知标签请求的回退。

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::AdmissionError;
use crate::group_controller::ThroughputGroupController;

/// 组控制器注册表
#[derive(Default)]
pub struct GroupControllerRegistry {
    controllers: DashMap<String, Arc<dyn ThroughputGroupController>>,
    default_controller: parking_lot::RwLock<Option<Arc<dyn ThroughputGroupController>>>,
}

impl GroupControllerRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            controllers: DashMap::new(),
            default_controller: parking_lot::RwLock::new(None),
        }
    }

    /// 注册一个组控制器
    ///
    /// 组名重复或出现第二个默认组时报配置错误,注册表保持原状。
    pub fn register(
        &self,
        controller: Arc<dyn ThroughputGroupController>,
    ) -> Result<(), AdmissionError> {
        let name = controller.group_name().to_string();

        match self.controllers.entry(name.clone()) {
            Entry::Occupied(_) => Err(AdmissionError::ConfigError(format!(
                "吞吐量组名称重复: {}",
                name
            ))),
            Entry::Vacant(slot) => {
                if controller.is_use_by_default() {
                    let mut default_slot = self.default_controller.write();
                    if default_slot.is_some() {
                        return Err(AdmissionError::ConfigError(
                            "默认吞吐量组最多只能有一个".to_string(),
                        ));
                    }
                    *default_slot = Some(Arc::clone(&controller));
                }

                tracing::debug!(group = %name, "组控制器已注册");
                slot.insert(controller);
                Ok(())
            }
        }
    }

    /// 按组名查找控制器
    pub fn lookup(&self, group_name: &str) -> Option<Arc<dyn ThroughputGroupController>> {
        self.controllers
            .get(group_name)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// 默认组控制器
    pub fn default_controller(&self) -> Option<Arc<dyn ThroughputGroupController>> {
        self.default_controller.read().clone()
    }

    /// 按请求标签路由
    ///
    /// 带标签的请求优先精确匹配,匹配不到时与无标签请求一样
    /// 落到默认组;没有默认组时返回 `None`,由调用方直通放行。
    pub fn route(&self, group_tag: Option<&str>) -> Option<Arc<dyn ThroughputGroupController>> {
        match group_tag {
            Some(tag) => self.lookup(tag).or_else(|| self.default_controller()),
            None => self.default_controller(),
        }
    }

    /// 向每个控制器广播新的容器吞吐量上限
    pub fn broadcast_max_throughput(&self, max_container_throughput: u64) {
        for entry in self.controllers.iter() {
            entry
                .value()
                .on_max_throughput_refresh(max_container_throughput);
        }
    }

    /// 向每个控制器同步存活的分区范围
    pub fn sync_partition_ranges(&self, live_range_ids: &[String]) {
        for entry in self.controllers.iter() {
            entry.value().sync_partition_ranges(live_range_ids);
        }
    }

    /// 关闭全部控制器
    ///
    /// 先收集引用再逐个关闭,不跨 await 持有分片锁。
    pub async fn close_all(&self) {
        let controllers: Vec<Arc<dyn ThroughputGroupController>> = self
            .controllers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for controller in controllers {
            controller.close().await;
        }
    }

    /// 已注册的组数量
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// 注册表是否为空
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// 每个组当前的吞吐量分配
    pub fn throughput_by_group(&self) -> Vec<(String, f64)> {
        self.controllers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().group_throughput()))
            .collect()
    }
}

// ============================================================================
// 单元测试
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdmissionError;
    use crate::request::{PermitGrant, RequestContext, RequestOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// 记录各回调次数的测试控制器
    struct RecordingController {
        name: String,
        use_by_default: bool,
        refresh_calls: AtomicU64,
        last_refresh_value: AtomicU64,
        close_calls: AtomicU64,
    }

    impl RecordingController {
        fn new(name: &str, use_by_default: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                use_by_default,
                refresh_calls: AtomicU64::new(0),
                last_refresh_value: AtomicU64::new(0),
                close_calls: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl ThroughputGroupController for RecordingController {
        async fn init(&self) -> Result<(), AdmissionError> {
            Ok(())
        }

        async fn acquire_permit(
            &self,
            _request: &RequestContext,
        ) -> Result<PermitGrant, AdmissionError> {
            Ok(PermitGrant::immediate())
        }

        fn record_outcome(&self, _outcome: &RequestOutcome) {}

        fn on_max_throughput_refresh(&self, max_container_throughput: u64) {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.last_refresh_value
                .store(max_container_throughput, Ordering::SeqCst);
        }

        fn group_name(&self) -> &str {
            &self.name
        }

        fn is_use_by_default(&self) -> bool {
            self.use_by_default
        }

        fn group_throughput(&self) -> f64 {
            self.last_refresh_value.load(Ordering::SeqCst) as f64
        }

        async fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// 测试注册与查找
    #[test]
    fn test_register_and_lookup() {
        let registry = GroupControllerRegistry::new();
        registry
            .register(RecordingController::new("oltp", false))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("oltp").is_some());
        assert!(registry.lookup("missing").is_none());
    }

    /// 测试重名注册被拒绝且注册表保持原状
    #[test]
    fn test_duplicate_name_rejected() {
        let registry = GroupControllerRegistry::new();
        registry
            .register(RecordingController::new("oltp", false))
            .unwrap();

        let err = registry
            .register(RecordingController::new("oltp", false))
            .unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(registry.len(), 1);
    }

    /// 测试第二个默认组被拒绝
    #[test]
    fn test_second_default_rejected() {
        let registry = GroupControllerRegistry::new();
        registry
            .register(RecordingController::new("a", true))
            .unwrap();

        let err = registry
            .register(RecordingController::new("b", true))
            .unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(registry.len(), 1);
    }

    /// 测试路由规则:精确匹配、未知标签回退、无标签回退
    #[test]
    fn test_route_rules() {
        let registry = GroupControllerRegistry::new();
        registry
            .register(RecordingController::new("oltp", false))
            .unwrap();
        registry
            .register(RecordingController::new("fallback", true))
            .unwrap();

        let matched = registry.route(Some("oltp")).unwrap();
        assert_eq!(matched.group_name(), "oltp");

        let unknown = registry.route(Some("no-such-group")).unwrap();
        assert_eq!(unknown.group_name(), "fallback");

        let untagged = registry.route(None).unwrap();
        assert_eq!(untagged.group_name(), "fallback");
    }

    /// 测试没有默认组时未知标签无路由
    #[test]
    fn test_route_without_default() {
        let registry = GroupControllerRegistry::new();
        registry
            .register(RecordingController::new("oltp", false))
            .unwrap();

        assert!(registry.route(Some("no-such-group")).is_none());
        assert!(registry.route(None).is_none());
    }

    /// 测试广播对每个控制器恰好通知一次
    #[test]
    fn test_broadcast_reaches_every_controller_once() {
        let registry = GroupControllerRegistry::new();
        let first = RecordingController::new("a", false);
        let second = RecordingController::new("b", false);
        registry
            .register(Arc::clone(&first) as Arc<dyn ThroughputGroupController>)
            .unwrap();
        registry
            .register(Arc::clone(&second) as Arc<dyn ThroughputGroupController>)
            .unwrap();

        registry.broadcast_max_throughput(2000);

        for controller in [&first, &second] {
            assert_eq!(controller.refresh_calls.load(Ordering::SeqCst), 1);
            assert_eq!(controller.last_refresh_value.load(Ordering::SeqCst), 2000);
        }
    }

    /// 测试关闭级联到每个控制器
    #[tokio::test]
    async fn test_close_all_cascades() {
        let registry = GroupControllerRegistry::new();
        let first = RecordingController::new("a", false);
        let second = RecordingController::new("b", true);
        registry
            .register(Arc::clone(&first) as Arc<dyn ThroughputGroupController>)
            .unwrap();
        registry
            .register(Arc::clone(&second) as Arc<dyn ThroughputGroupController>)
            .unwrap();

        registry.close_all().await;

        assert_eq!(first.close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.close_calls.load(Ordering::SeqCst), 1);
    }
}
