//! 容量解析抽象层
//!
//! 定义远端报价查询与分区范围查询的协作方接口、解析到的身份
//! 与吞吐量上限的数据模型,以及用于测试的脚本化实现。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AdmissionError;

/// 远端吞吐量报价
///
/// 自动伸缩上限与手动配置吞吐量实践中互斥,取其中已设置者。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputOffer {
    /// 自动伸缩模式下的最大吞吐量
    pub autoscale_max_throughput: Option<u64>,
    /// 手动配置的吞吐量
    pub manual_throughput: Option<u64>,
}

impl ThroughputOffer {
    /// 手动配置的报价
    pub fn manual(throughput: u64) -> Self {
        Self {
            autoscale_max_throughput: None,
            manual_throughput: Some(throughput),
        }
    }

    /// 自动伸缩的报价
    pub fn autoscale(max_throughput: u64) -> Self {
        Self {
            autoscale_max_throughput: Some(max_throughput),
            manual_throughput: None,
        }
    }

    /// 报价给出的容器吞吐量上限
    pub fn max_throughput(&self) -> u64 {
        std::cmp::max(
            self.autoscale_max_throughput.unwrap_or(0),
            self.manual_throughput.unwrap_or(0),
        )
    }
}

/// 解析到的资源身份
///
/// 初始化阶段填充一次,之后只读。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    /// 容器资源标识
    pub container_rid: String,
    /// 数据库资源标识
    pub database_rid: String,
}

/// 吞吐量解析作用域
///
/// `NoResolve` 表示全部组使用绝对额度,无需远端上限;
/// 其余两个值指示当前持有权威报价的作用域。作用域具有粘性:
/// 一次"无报价"失败翻转到另一侧,成功解析不会自动翻转回来。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThroughputResolveLevel {
    /// 无需解析
    NoResolve,
    /// 容器作用域持有报价
    Container,
    /// 数据库作用域持有报价
    Database,
}

impl ThroughputResolveLevel {
    /// 翻转到另一个作用域
    ///
    /// `NoResolve` 保持不变。
    pub fn flipped(&self) -> Self {
        match self {
            ThroughputResolveLevel::NoResolve => ThroughputResolveLevel::NoResolve,
            ThroughputResolveLevel::Container => ThroughputResolveLevel::Database,
            ThroughputResolveLevel::Database => ThroughputResolveLevel::Container,
        }
    }
}

/// 共享的容器吞吐量上限
///
/// 唯一写入方是初始化与刷新路径,所有组控制器并发读取。
#[derive(Debug, Default)]
pub struct MaxContainerThroughput {
    value: AtomicU64,
}

impl MaxContainerThroughput {
    /// 创建一个未知上限（0）
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// 读取当前上限
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// 写入新上限
    pub fn set(&self, max_throughput: u64) {
        self.value.store(max_throughput, Ordering::SeqCst);
    }

    /// 上限是否已知
    pub fn is_known(&self) -> bool {
        self.get() > 0
    }
}

/// 容量解析接口
///
/// 由外部传输层实现;初始化与每个刷新周期都会调用。
#[async_trait]
pub trait CapacityResolver: Send + Sync {
    /// 读取容器元数据,返回容器资源标识
    async fn resolve_container_resource_id(&self) -> Result<String, AdmissionError>;

    /// 读取数据库元数据,返回数据库资源标识
    async fn resolve_database_resource_id(&self) -> Result<String, AdmissionError>;

    /// 查询指定资源的吞吐量报价
    ///
    /// 错误分类必须可区分:"该资源无报价"（[`AdmissionError::OfferNotConfigured`]）、
    /// "资源已删除"（[`AdmissionError::ResourceGone`]）与其余一般失败。
    async fn read_offer(&self, resource_id: &str) -> Result<ThroughputOffer, AdmissionError>;
}

/// 分区范围查询接口
#[async_trait]
pub trait PartitionRangeSource: Send + Sync {
    /// 查询集合当前的分区范围标识列表
    async fn range_ids(&self, collection_rid: &str) -> Result<Vec<String>, AdmissionError>;
}

/// 固定分区范围表
///
/// 面向测试与单分区场景的最小实现。
#[derive(Debug, Clone)]
pub struct StaticPartitionRanges {
    ranges: Vec<String>,
}

impl StaticPartitionRanges {
    /// 使用给定的范围列表
    pub fn new(ranges: Vec<String>) -> Self {
        Self { ranges }
    }

    /// 单分区
    pub fn single() -> Self {
        Self {
            ranges: vec!["range-0".to_string()],
        }
    }
}

#[async_trait]
impl PartitionRangeSource for StaticPartitionRanges {
    async fn range_ids(&self, _collection_rid: &str) -> Result<Vec<String>, AdmissionError> {
        Ok(self.ranges.clone())
    }
}

/// 脚本化的报价结果
#[derive(Debug, Clone)]
pub enum OfferScript {
    /// 返回报价
    Offer(ThroughputOffer),
    /// 该资源无报价
    NoOffer,
    /// 资源已删除
    ResourceGone,
    /// 一般失败
    Transient(String),
}

/// 脚本化的容量解析器
///
/// 每个资源标识维护一个结果队列,按序弹出;队列耗尽时最后一个
/// 结果保持生效。未脚本化的资源视为无报价。
pub struct MockCapacityResolver {
    container_rid: String,
    database_rid: String,
    scripts: dashmap::DashMap<String, VecDeque<OfferScript>>,
    last_scripts: dashmap::DashMap<String, OfferScript>,
    identity_error: parking_lot::Mutex<Option<String>>,
    offer_reads: AtomicU64,
    offer_reads_by_rid: dashmap::DashMap<String, u64>,
    identity_reads: AtomicU64,
}

impl MockCapacityResolver {
    /// 创建解析器,固定两级资源标识
    pub fn new(container_rid: impl Into<String>, database_rid: impl Into<String>) -> Self {
        Self {
            container_rid: container_rid.into(),
            database_rid: database_rid.into(),
            scripts: dashmap::DashMap::new(),
            last_scripts: dashmap::DashMap::new(),
            identity_error: parking_lot::Mutex::new(None),
            offer_reads: AtomicU64::new(0),
            offer_reads_by_rid: dashmap::DashMap::new(),
            identity_reads: AtomicU64::new(0),
        }
    }

    /// 为资源追加一个脚本化结果
    pub fn script_offer(&self, resource_id: impl Into<String>, script: OfferScript) -> &Self {
        self.scripts
            .entry(resource_id.into())
            .or_default()
            .push_back(script);
        self
    }

    /// 令身份解析失败
    pub fn fail_identity_with(&self, message: impl Into<String>) {
        *self.identity_error.lock() = Some(message.into());
    }

    /// 报价查询总次数
    pub fn offer_read_count(&self) -> u64 {
        self.offer_reads.load(Ordering::SeqCst)
    }

    /// 指定资源的报价查询次数
    pub fn offer_read_count_for(&self, resource_id: &str) -> u64 {
        self.offer_reads_by_rid
            .get(resource_id)
            .map(|c| *c)
            .unwrap_or(0)
    }

    fn next_script(&self, resource_id: &str) -> OfferScript {
        let popped = self
            .scripts
            .get_mut(resource_id)
            .and_then(|mut queue| queue.pop_front());
        match popped {
            Some(script) => {
                self.last_scripts
                    .insert(resource_id.to_string(), script.clone());
                script
            }
            // 队列耗尽后最后一个脚本保持生效
            None => self
                .last_scripts
                .get(resource_id)
                .map(|last| last.clone())
                .unwrap_or(OfferScript::NoOffer),
        }
    }
}

#[async_trait]
impl CapacityResolver for MockCapacityResolver {
    async fn resolve_container_resource_id(&self) -> Result<String, AdmissionError> {
        self.identity_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.identity_error.lock().clone() {
            return Err(AdmissionError::ResolveFailed(message));
        }
        Ok(self.container_rid.clone())
    }

    async fn resolve_database_resource_id(&self) -> Result<String, AdmissionError> {
        self.identity_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.identity_error.lock().clone() {
            return Err(AdmissionError::ResolveFailed(message));
        }
        Ok(self.database_rid.clone())
    }

    async fn read_offer(&self, resource_id: &str) -> Result<ThroughputOffer, AdmissionError> {
        self.offer_reads.fetch_add(1, Ordering::SeqCst);
        *self
            .offer_reads_by_rid
            .entry(resource_id.to_string())
            .or_insert(0) += 1;

        match self.next_script(resource_id) {
            OfferScript::Offer(offer) => Ok(offer),
            OfferScript::NoOffer => Err(AdmissionError::OfferNotConfigured {
                resource_id: resource_id.to_string(),
            }),
            OfferScript::ResourceGone => Err(AdmissionError::ResourceGone {
                resource_id: resource_id.to_string(),
            }),
            OfferScript::Transient(message) => Err(AdmissionError::ResolveFailed(message)),
        }
    }
}

// ============================================================================
// 单元测试
// ============================================================================
