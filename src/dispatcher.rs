//! 控制器调度器
//!
//! 进程级共享的容器控制器注册表:按容器归属把请求分发给对应的
//! 容器控制器,无人认领的请求直通放行。

use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::container_controller::ThroughputContainerController;
use crate::error::AdmissionError;
use crate::request::{RequestChargeReport, RequestContext};

/// 容器控制器调度器
///
/// 以容器名称为键保存控制器;分发时逐个询问
/// [`ThroughputContainerController::can_handle_request`],
/// 第一个认领请求的控制器负责处理。
pub struct ControllerDispatcher {
    controllers: Mutex<HashMap<String, Arc<ThroughputContainerController>>>,
}

impl ControllerDispatcher {
    /// 创建新的调度器
    pub fn new() -> Self {
        Self {
            controllers: Mutex::new(HashMap::new()),
        }
    }

    /// 注册一个容器控制器
    ///
    /// 同名容器的旧控制器被替换并返回,供调用方善后关闭。
    pub fn register(
        &self,
        controller: Arc<ThroughputContainerController>,
    ) -> Option<Arc<ThroughputContainerController>> {
        let name = controller.container_name().to_string();
        let replaced = self.controllers.lock().insert(name.clone(), controller);
        if replaced.is_some() {
            debug!(container = %name, "同名容器控制器已被替换");
        }
        replaced
    }

    /// 注销指定容器的控制器
    pub fn unregister(
        &self,
        container_name: &str,
    ) -> Option<Arc<ThroughputContainerController>> {
        self.controllers.lock().remove(container_name)
    }

    /// 按容器名称查找控制器
    pub fn lookup(&self, container_name: &str) -> Option<Arc<ThroughputContainerController>> {
        self.controllers.lock().get(container_name).cloned()
    }

    /// 分发一个请求
    ///
    /// 找到认领该请求的控制器则交由其处理;没有任何控制器认领时
    /// 直接调用 `next_stage`,准入层对这类请求完全透明。
    pub async fn dispatch_request<T, E, F, Fut>(
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
        // 在锁内完成匹配,拿到引用后立即释放锁再执行异步处理
        let matched = {
            let controllers = self.controllers.lock();
            controllers
                .values()
                .find(|controller| controller.can_handle_request(request))
                .cloned()
        };

        match matched {
            Some(controller) => controller.process_request(request, next_stage).await,
            None => {
                debug!(request_id = %request.request_id, "请求不属于任何已注册容器,直通放行");
                next_stage().await
            }
        }
    }

    /// 关闭并移除全部控制器
    pub async fn close_all(&self) {
        let controllers: Vec<_> = {
            let mut map = self.controllers.lock();
            map.drain().map(|(_, controller)| controller).collect()
        };
        for controller in controllers {
            controller.close().await;
        }
    }

    /// 已注册的控制器数量
    pub fn len(&self) -> usize {
        self.controllers.lock().len()
    }

    /// 是否没有任何控制器
    pub fn is_empty(&self) -> bool {
        self.controllers.lock().is_empty()
    }
}

impl Default for ControllerDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    /// 全局控制器调度器实例
    pub static ref GLOBAL_DISPATCHER: ControllerDispatcher = ControllerDispatcher::new();
}

// ============================================================================
// 单元测试
// ============================================================================
