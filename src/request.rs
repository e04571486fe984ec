//! 请求模型
//!
//! 定义准入控制层看到的请求上下文,以及从调用结果读取实际
//! 请求单位消耗的回报接口。准入层不关心请求的具体载荷,
//! 只依赖这里声明的最小信息。

use std::time::Duration;

use crate::constants::MAX_REQUEST_CHARGE;
use crate::error::AdmissionError;

/// 请求上下文
///
/// 由上游请求管线构造;`collection_rid` 在上游完成地址解析后填入,
/// 供控制器的归属判定使用。
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// 请求关联标识
    pub request_id: String,
    /// 吞吐量组标签,缺失时路由到默认组
    pub group_tag: Option<String>,
    /// 上游解析出的集合资源标识
    pub collection_rid: Option<String>,
    /// 目标分区范围标识
    pub partition_range_id: Option<String>,
}

impl RequestContext {
    /// 创建一个新的请求上下文
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            group_tag: None,
            collection_rid: None,
            partition_range_id: None,
        }
    }

    /// 指定吞吐量组标签
    pub fn with_group_tag(mut self, tag: impl Into<String>) -> Self {
        self.group_tag = Some(tag.into());
        self
    }

    /// 指定已解析的集合资源标识
    pub fn with_collection_rid(mut self, rid: impl Into<String>) -> Self {
        self.collection_rid = Some(rid.into());
        self
    }

    /// 指定目标分区范围
    pub fn with_partition_range(mut self, range_id: impl Into<String>) -> Self {
        self.partition_range_id = Some(range_id.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// 请求成本回报
///
/// 包装后的下一阶段调用,其成功值与错误值都必须实现该接口,
/// 组控制器以实际消耗（而非估算值）修正记账。
pub trait RequestChargeReport {
    /// 实际消耗的请求单位
    fn request_charge(&self) -> f64;

    /// 服务端是否回应了限流
    fn is_throttled(&self) -> bool {
        false
    }
}

/// 携带请求单位消耗的通用响应信封
///
/// 供载荷自身不携带成本信息的调用方使用。
#[derive(Debug, Clone)]
pub struct ChargedResponse<T> {
    /// 调用载荷
    pub payload: T,
    /// 本次调用消耗的请求单位
    pub request_charge: f64,
}

impl<T> ChargedResponse<T> {
    /// 包装载荷与消耗
    pub fn new(payload: T, request_charge: f64) -> Self {
        Self {
            payload,
            request_charge,
        }
    }

    /// 取出载荷
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T> RequestChargeReport for ChargedResponse<T> {
    fn request_charge(&self) -> f64 {
        self.request_charge
    }
}

// 准入层自身产生的错误不消耗请求单位
impl RequestChargeReport for AdmissionError {
    fn request_charge(&self) -> f64 {
        0.0
    }

    fn is_throttled(&self) -> bool {
        matches!(self, AdmissionError::GroupBudgetExhausted { .. })
    }
}

/// 请求完成后的记账信息
#[derive(Debug, Clone, Copy)]
pub struct RequestOutcome {
    /// 实际消耗的请求单位（已钳制到合法区间）
    pub request_charge: f64,
    /// 下一阶段调用是否成功
    pub succeeded: bool,
    /// 服务端是否回应了限流
    pub throttled: bool,
}

impl RequestOutcome {
    /// 从成功结果构造
    pub fn from_success<T: RequestChargeReport>(value: &T) -> Self {
        Self {
            request_charge: clamp_charge(value.request_charge()),
            succeeded: true,
            throttled: value.is_throttled(),
        }
    }

    /// 从失败结果构造
    pub fn from_failure<E: RequestChargeReport>(error: &E) -> Self {
        Self {
            request_charge: clamp_charge(error.request_charge()),
            succeeded: false,
            throttled: error.is_throttled(),
        }
    }
}

/// 准入许可
///
/// 记录组控制器在放行前内部施加的等待时长,用于诊断与测试。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PermitGrant {
    /// 放行前施加的等待
    pub imposed_delay: Duration,
}

impl PermitGrant {
    /// 立即放行
    pub fn immediate() -> Self {
        Self {
            imposed_delay: Duration::ZERO,
        }
    }

    /// 等待后放行
    pub fn delayed(delay: Duration) -> Self {
        Self {
            imposed_delay: delay,
        }
    }
}

fn clamp_charge(charge: f64) -> f64 {
    if !charge.is_finite() || charge < 0.0 {
        return 0.0;
    }
    charge.min(MAX_REQUEST_CHARGE)
}

// ============================================================================
// 单元测试
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_context_builder() {
        let request = RequestContext::new()
            .with_group_tag("analytics")
            .with_collection_rid("rid-col-1")
            .with_partition_range("range-0");

        assert_eq!(request.group_tag.as_deref(), Some("analytics"));
        assert_eq!(request.collection_rid.as_deref(), Some("rid-col-1"));
        assert_eq!(request.partition_range_id.as_deref(), Some("range-0"));
        assert!(!request.request_id.is_empty());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let first = RequestContext::new();
        let second = RequestContext::new();
        assert_ne!(first.request_id, second.request_id);
    }

    #[test]
    fn test_charged_response_reports_cost() {
        let response = ChargedResponse::new("payload", 12.5);
        assert_eq!(response.request_charge(), 12.5);
        assert!(!response.is_throttled());
        assert_eq!(response.into_payload(), "payload");
    }

    #[test]
    fn test_outcome_from_success() {
        let response = ChargedResponse::new((), 7.0);
        let outcome = RequestOutcome::from_success(&response);
        assert!(outcome.succeeded);
        assert!(!outcome.throttled);
        assert_eq!(outcome.request_charge, 7.0);
    }

    #[test]
    fn test_outcome_clamps_invalid_charge() {
        let response = ChargedResponse::new((), f64::NAN);
        let outcome = RequestOutcome::from_success(&response);
        assert_eq!(outcome.request_charge, 0.0);

        let response = ChargedResponse::new((), -3.0);
        let outcome = RequestOutcome::from_success(&response);
        assert_eq!(outcome.request_charge, 0.0);

        let response = ChargedResponse::new((), f64::INFINITY);
        let outcome = RequestOutcome::from_success(&response);
        assert_eq!(outcome.request_charge, MAX_REQUEST_CHARGE);
    }

    #[test]
    fn test_admission_error_reports_zero_charge() {
        let error = AdmissionError::ControllerClosed("orders".to_string());
        let outcome = RequestOutcome::from_failure(&error);
        assert_eq!(outcome.request_charge, 0.0);
        assert!(!outcome.succeeded);
    }

    #[test]
    fn test_budget_exhausted_counts_as_throttled() {
        let error = AdmissionError::GroupBudgetExhausted {
            group: "oltp".to_string(),
            retry_after_ms: 100,
        };
        assert!(error.is_throttled());
    }

    #[test]
    fn test_permit_grant() {
        assert_eq!(PermitGrant::immediate().imposed_delay, Duration::ZERO);
        assert_eq!(
            PermitGrant::delayed(Duration::from_millis(40)).imposed_delay,
            Duration::from_millis(40)
        );
    }
}
