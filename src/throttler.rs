//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 请求节流器模块
//!
//! 实现基于使用周期的吞吐量预算:周期内乐观放行,实际费用事后扣减,
//! 欠账结转到下一周期,等待超过上限时直接拒绝。

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::constants::THROUGHPUT_USAGE_CYCLE_MS;
use crate::error::AdmissionError;
use crate::request::PermitGrant;

/// 单次准入尝试的结果
#[derive(Debug, Clone, Copy, PartialEq)]
enum TryAdmit {
    /// 预算仍有余额,放行
    Admitted,
    /// 预算耗尽,需等待到下一周期边界
    MustWait(Duration),
}

/// 周期预算状态
#[derive(Debug)]
struct CycleState {
    /// 每周期计划预算
    scheduled: f64,
    /// 当前周期剩余余额,可为负（欠账）
    available: f64,
    /// 当前周期起点
    cycle_started_at: Instant,
}

/// 请求节流器
///
/// 每个吞吐量组持有一个实例。预算按固定使用周期补充:
/// 新周期余额 = 计划预算 + min(上周期余额, 0),即超支部分
/// 从下一周期扣除。只要余额为正就放行,实际费用在响应后扣减,
/// 因此单个大请求可以临时超出周期预算。
pub struct RequestThrottler {
    /// 所属组名,用于日志与错误信息
    group_name: String,
    state: Mutex<CycleState>,
    /// 累计等待超过该值时拒绝请求;`None` 表示始终等待,从不拒绝
    max_admission_delay: Option<Duration>,
}

impl RequestThrottler {
    /// 创建节流器
    ///
    /// # 参数
    /// - `group_name`: 所属吞吐量组名
    /// - `scheduled_throughput`: 每周期计划预算（请求单位）
    /// - `max_admission_delay`: 准入等待上限,超过即拒绝;`None` 表示无上限
    ///
    /// # 示例
    /// ```rust
    /// use admitron::throttler::RequestThrottler;
    /// use std::time::Duration;
    ///
    /// let throttler = RequestThrottler::new("reads", 100.0, Some(Duration::from_secs(5)));
    /// assert_eq!(throttler.scheduled_throughput(), 100.0);
    /// ```
    pub fn new(
        group_name: impl Into<String>,
        scheduled_throughput: f64,
        max_admission_delay: Option<Duration>,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            state: Mutex::new(CycleState {
                scheduled: scheduled_throughput,
                available: scheduled_throughput,
                cycle_started_at: Instant::now(),
            }),
            max_admission_delay,
        }
    }

    /// 申请准入
    ///
    /// 余额为正时立即放行;否则等待到下一周期边界后重试。
    /// 配置了等待上限且累计等待将超过上限时,返回
    /// [`AdmissionError::GroupBudgetExhausted`],其中携带建议的重试间隔;
    /// 未配置上限时始终等待,从不拒绝。
    ///
    /// # 返回
    /// - `Ok(grant)`: 放行,`grant` 记录实际施加的延迟
    /// - `Err(error)`: 拒绝
    pub async fn acquire(&self) -> Result<PermitGrant, AdmissionError> {
        let mut imposed_delay = Duration::ZERO;

        loop {
            let wait = match self.try_admit(Instant::now()) {
                TryAdmit::Admitted => {
                    return Ok(if imposed_delay.is_zero() {
                        PermitGrant::immediate()
                    } else {
                        PermitGrant::delayed(imposed_delay)
                    });
                }
                TryAdmit::MustWait(wait) => wait,
            };

            if let Some(max_delay) = self.max_admission_delay {
                if imposed_delay + wait > max_delay {
                    let retry_after_ms = wait.as_millis() as u64;
                    tracing::warn!(
                        group = %self.group_name,
                        wait_ms = retry_after_ms,
                        max_delay_ms = max_delay.as_millis() as u64,
                        "准入等待超过上限,拒绝请求"
                    );
                    return Err(AdmissionError::GroupBudgetExhausted {
                        group: self.group_name.clone(),
                        retry_after_ms,
                    });
                }
            }

            tracing::debug!(
                group = %self.group_name,
                wait_ms = wait.as_millis() as u64,
                "周期预算耗尽,等待下一周期"
            );
            tokio::time::sleep(wait).await;
            imposed_delay += wait;
        }
    }

    /// 扣减实际费用
    ///
    /// 在响应返回后调用。费用落在哪个周期无关紧要,
    /// 超支部分会通过欠账结转在后续周期补偿。
    pub fn record_charge(&self, charge: f64) {
        if !charge.is_finite() || charge <= 0.0 {
            return;
        }
        let mut state = self.state.lock();
        state.available -= charge;
    }

    /// 记录一次被上游限流的响应
    ///
    /// 清空当前周期余额,后续请求等待到下一周期。
    pub fn record_throttled(&self) {
        let mut state = self.state.lock();
        state.available = state.available.min(0.0);
        tracing::debug!(group = %self.group_name, "收到上游限流反馈,冻结当前周期");
    }

    /// 更新每周期计划预算
    ///
    /// 差额立即并入当前周期余额,升降配不必等待周期结束生效。
    pub fn update_scheduled_throughput(&self, scheduled_throughput: f64) {
        let mut state = self.state.lock();
        let delta = scheduled_throughput - state.scheduled;
        if delta != 0.0 {
            state.available += delta;
            state.scheduled = scheduled_throughput;
            tracing::debug!(
                group = %self.group_name,
                scheduled = scheduled_throughput,
                "周期预算已更新"
            );
        }
    }

    /// 当前计划预算
    pub fn scheduled_throughput(&self) -> f64 {
        self.state.lock().scheduled
    }

    /// 当前周期剩余余额
    pub fn available_throughput(&self) -> f64 {
        let mut state = self.state.lock();
        Self::renew_cycle_if_due(&mut state, Instant::now());
        state.available
    }

    /// 尝试准入一次
    fn try_admit(&self, now: Instant) -> TryAdmit {
        let mut state = self.state.lock();
        Self::renew_cycle_if_due(&mut state, now);

        if state.available > 0.0 {
            return TryAdmit::Admitted;
        }

        let cycle = Duration::from_millis(THROUGHPUT_USAGE_CYCLE_MS);
        let elapsed = now.duration_since(state.cycle_started_at);
        // renew_cycle_if_due 已保证 elapsed < cycle
        TryAdmit::MustWait(cycle - elapsed)
    }

    /// 按已流逝的周期数补充预算
    ///
    /// 每个流逝周期执行一次欠账结转;余额转正后剩余周期不再
    /// 改变余额,直接对齐周期起点。
    fn renew_cycle_if_due(state: &mut CycleState, now: Instant) {
        let cycle = Duration::from_millis(THROUGHPUT_USAGE_CYCLE_MS);
        let mut elapsed = now.duration_since(state.cycle_started_at);

        while elapsed >= cycle {
            state.available = state.scheduled + state.available.min(0.0);
            state.cycle_started_at += cycle;
            elapsed -= cycle;

            if state.available >= state.scheduled {
                // 无欠账,跳过剩余整周期
                let whole_cycles = (elapsed.as_millis() / cycle.as_millis()) as u32;
                state.cycle_started_at += cycle * whole_cycles;
                break;
            }
        }
    }
}

impl std::fmt::Debug for RequestThrottler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RequestThrottler")
            .field("group_name", &self.group_name)
            .field("scheduled", &state.scheduled)
            .field("available", &state.available)
            .finish()
    }
}

// ============================================================================
// 单元测试
// ============================================================================
