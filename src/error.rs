//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 错误类型定义
//!
//! 使用thiserror定义所有错误类型。准入控制的错误分为致命配置错误、
//! 可恢复的作用域歧义错误、致命的资源删除错误与可容忍的瞬时错误。

use thiserror::Error;

/// Admitron 错误类型
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// 配置错误（致命,构造/初始化阶段同步抛出,不重试）
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 指定资源在当前作用域下不存在吞吐量报价（可通过切换作用域恢复一次）
    #[error("资源未配置吞吐量报价: {resource_id}")]
    OfferNotConfigured {
        /// 查询报价时使用的资源标识
        resource_id: String,
    },

    /// 容器或数据库已被删除（致命,触发控制器整体关闭）
    #[error("资源已不存在: {resource_id}")]
    ResourceGone {
        /// 解析时使用的资源标识
        resource_id: String,
    },

    /// 容量解析失败（瞬时错误,保留上一次的吞吐量上限）
    #[error("容量解析失败: {0}")]
    ResolveFailed(String),

    /// 组预算耗尽且等待时间超出上限（硬拒绝模式）
    #[error("吞吐量组预算耗尽: {group}, 建议重试间隔 {retry_after_ms}ms")]
    GroupBudgetExhausted {
        /// 吞吐量组名称
        group: String,
        /// 距下一个用量周期的毫秒数
        retry_after_ms: u64,
    },

    /// 控制器已关闭
    #[error("控制器已关闭: {0}")]
    ControllerClosed(String),

    /// IO错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// YAML解析错误
    #[error("YAML解析错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// 内部错误
    #[error("内部错误: {0}")]
    InternalError(String),
}

impl AdmissionError {
    /// 是否为"当前作用域无报价"错误
    ///
    /// 该错误触发解析作用域在容器与数据库之间切换并重试一次,
    /// 区别于其他所有解析失败。
    pub fn is_offer_not_configured(&self) -> bool {
        matches!(self, AdmissionError::OfferNotConfigured { .. })
    }

    /// 是否为"资源已删除"错误
    ///
    /// 刷新周期中遇到该错误时整个控制器必须关闭。
    pub fn is_resource_gone(&self) -> bool {
        matches!(self, AdmissionError::ResourceGone { .. })
    }

    /// 是否为配置错误
    pub fn is_config_error(&self) -> bool {
        matches!(self, AdmissionError::ConfigError(_))
    }

    /// 硬拒绝时的建议重试间隔
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            AdmissionError::GroupBudgetExhausted { retry_after_ms, .. } => {
                Some(std::time::Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }
}
