//! 配置模块
//!
//! 定义吞吐量准入控制的配置结构。一份配置面向单个容器,
//! 包含若干静态声明的吞吐量组;配置在控制器构造后不可变更。

use ahash::AHashSet as HashSet;
use serde::{Deserialize, Serialize};

use crate::constants::{
    MAX_GROUP_NAME_LENGTH, MAX_THROUGHPUT_FRACTION, MIN_ABSOLUTE_THROUGHPUT,
    MIN_REFRESH_INTERVAL_MS, MIN_THROUGHPUT_FRACTION,
};
use crate::error::AdmissionError;

/// 吞吐量控制配置（单容器）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThroughputControlConfig {
    /// 目标容器名称
    pub container_name: String,
    /// 容量刷新周期（毫秒）,缺省为 60 秒
    pub refresh_interval_ms: Option<u64>,
    /// 本进程的稳定主机标识,缺省时自动生成
    pub host_id: Option<String>,
    /// 吞吐量组列表
    pub groups: Vec<ThroughputGroupConfig>,
}

impl Default for ThroughputControlConfig {
    fn default() -> Self {
        Self {
            container_name: String::new(),
            refresh_interval_ms: None,
            host_id: None,
            groups: Vec::new(),
        }
    }
}

impl ThroughputControlConfig {
    /// 从YAML文本加载配置
    pub fn from_yaml_str(yaml: &str) -> Result<Self, AdmissionError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// 从TOML文本加载配置
    pub fn from_toml_str(toml_str: &str) -> Result<Self, AdmissionError> {
        toml::from_str(toml_str)
            .map_err(|e| AdmissionError::ConfigError(format!("TOML解析错误: {}", e)))
    }

    /// 从JSON文本加载配置
    pub fn from_json_str(json: &str) -> Result<Self, AdmissionError> {
        Ok(serde_json::from_str(json)?)
    }

    /// 按扩展名从文件加载配置
    ///
    /// 支持 `.yaml`/`.yml`、`.toml` 与 `.json`。
    pub fn from_file(path: &std::path::Path) -> Result<Self, AdmissionError> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            other => Err(AdmissionError::ConfigError(format!(
                "不支持的配置文件格式: {:?}",
                other
            ))),
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.container_name.is_empty() {
            return Err("容器名称不能为空".to_string());
        }

        if let Some(interval) = self.refresh_interval_ms {
            if interval < MIN_REFRESH_INTERVAL_MS {
                return Err(format!(
                    "刷新周期过短: {}ms, 最小值: {}ms",
                    interval, MIN_REFRESH_INTERVAL_MS
                ));
            }
        }

        if let Some(host_id) = &self.host_id {
            if host_id.trim().is_empty() {
                return Err("主机标识不能为空白".to_string());
            }
        }

        if self.groups.is_empty() {
            return Err("至少需要一个吞吐量组".to_string());
        }

        let mut group_names = HashSet::new();
        let mut default_count = 0usize;
        for (index, group) in self.groups.iter().enumerate() {
            if !group_names.insert(&group.group_name) {
                return Err(format!("吞吐量组名称重复: {}", group.group_name));
            }

            if group.use_by_default {
                default_count += 1;
            }

            group
                .validate()
                .map_err(|e| format!("吞吐量组[{}]校验失败: {}", index, e))?;
        }

        if default_count > 1 {
            return Err("默认吞吐量组最多只能有一个".to_string());
        }

        Ok(())
    }

    /// 配置的有效主机标识,未指定时生成一个稳定的随机标识
    pub fn resolved_host_id(&self) -> String {
        match &self.host_id {
            Some(id) => id.clone(),
            None => generate_host_id(),
        }
    }

    /// 配置的有效刷新周期
    pub fn resolved_refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(
            self.refresh_interval_ms
                .unwrap_or(crate::constants::DEFAULT_REFRESH_INTERVAL_SECS * 1000),
        )
    }

    /// 是否存在需要远端吞吐量上限的组（按比例分配的组）
    ///
    /// 全部为绝对额度的配置无需解析容器报价。
    pub fn requires_remote_ceiling(&self) -> bool {
        self.groups.iter().any(|g| g.requires_remote_ceiling())
    }
}

/// 吞吐量组配置
///
/// 组名称在容器内唯一;额度要么是绝对的请求单位上限,
/// 要么是容器总容量的一个比例。构造后不可变更。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThroughputGroupConfig {
    /// 组名称（容器内唯一键）
    pub group_name: String,
    /// 控制策略
    pub strategy: ControlStrategy,
    /// 容量额度
    pub share: ThroughputShare,
    /// 是否作为缺省回退组
    #[serde(default)]
    pub use_by_default: bool,
    /// 准入等待上限（毫秒）;超出时硬拒绝,缺省时始终等待
    pub max_admission_delay_ms: Option<u64>,
}

impl ThroughputGroupConfig {
    /// 校验组配置
    pub fn validate(&self) -> Result<(), String> {
        if self.group_name.is_empty() {
            return Err("组名称不能为空".to_string());
        }

        if self.group_name.len() > MAX_GROUP_NAME_LENGTH {
            return Err(format!(
                "组名称过长: {} 字符, 最大值: {}",
                self.group_name.len(),
                MAX_GROUP_NAME_LENGTH
            ));
        }

        self.share.validate()?;
        self.strategy.validate()?;

        Ok(())
    }

    /// 该组的额度是否依赖远端解析的容器吞吐量上限
    pub fn requires_remote_ceiling(&self) -> bool {
        matches!(self.share, ThroughputShare::Fraction { .. })
    }
}

/// 控制策略
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ControlStrategy {
    /// 本地估算:仅依据本进程观测到的消耗进行记账
    Local,
    /// 全局协调:按服务端下发的各客户端负载快照计算公平份额
    Global {
        /// 负载快照的存活时长（毫秒）,过期快照不参与份额计算
        load_snapshot_ttl_ms: Option<u64>,
    },
}

impl ControlStrategy {
    /// 校验策略配置
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ControlStrategy::Local => Ok(()),
            ControlStrategy::Global {
                load_snapshot_ttl_ms,
            } => {
                if let Some(ttl) = load_snapshot_ttl_ms {
                    if *ttl == 0 {
                        return Err("负载快照存活时长不能为0".to_string());
                    }
                }
                Ok(())
            }
        }
    }
}

/// 容量额度
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ThroughputShare {
    /// 绝对请求单位上限
    Absolute {
        /// 每个用量周期可用的请求单位
        request_units: u64,
    },
    /// 容器总容量的比例
    Fraction {
        /// (0, 1] 区间内的比例
        ratio: f64,
    },
}

impl ThroughputShare {
    /// 校验额度
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ThroughputShare::Absolute { request_units } => {
                if *request_units < MIN_ABSOLUTE_THROUGHPUT {
                    return Err(format!(
                        "绝对额度不能小于 {} 请求单位",
                        MIN_ABSOLUTE_THROUGHPUT
                    ));
                }
                Ok(())
            }
            ThroughputShare::Fraction { ratio } => {
                if !ratio.is_finite()
                    || *ratio < MIN_THROUGHPUT_FRACTION
                    || *ratio > MAX_THROUGHPUT_FRACTION
                {
                    return Err(format!(
                        "比例额度必须在 [{}, {}] 区间内: {}",
                        MIN_THROUGHPUT_FRACTION, MAX_THROUGHPUT_FRACTION, ratio
                    ));
                }
                Ok(())
            }
        }
    }

    /// 依据当前容器上限换算组的绝对吞吐量
    ///
    /// 比例额度在上限未知（为0）时返回 `None`。
    pub fn resolve(&self, max_container_throughput: u64) -> Option<f64> {
        match self {
            ThroughputShare::Absolute { request_units } => Some(*request_units as f64),
            ThroughputShare::Fraction { ratio } => {
                if max_container_throughput == 0 {
                    None
                } else {
                    Some(max_container_throughput as f64 * ratio)
                }
            }
        }
    }
}

/// 生成一个进程级主机标识
pub fn generate_host_id() -> String {
    format!("client-{}", uuid::Uuid::new_v4())
}

// ============================================================================
// 单元测试
// ============================================================================
