use serde::Serialize;

use crate::error::ReconError;
use crate::models::{CorrectionItem, CorrectionPayload, Discrepancies, ReconLine};

/// 纠正提交状态机的状态
///
/// Computing 是瞬态: 定稿时同步跑比对，直接落到第一个适用状态。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionState {
    #[default]
    Idle,
    AwaitingMissingResolution,
    AwaitingExtraResolution,
    ReadyToSubmit,
    Submitting,
    Submitted,
    Failed,
}

impl CorrectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionState::Idle => "idle",
            CorrectionState::AwaitingMissingResolution => "awaiting_missing_resolution",
            CorrectionState::AwaitingExtraResolution => "awaiting_extra_resolution",
            CorrectionState::ReadyToSubmit => "ready_to_submit",
            CorrectionState::Submitting => "submitting",
            CorrectionState::Submitted => "submitted",
            CorrectionState::Failed => "failed",
        }
    }
}

/// 状态机输入事件 - 每次迁移显式给输入，不靠共享可变表单
#[derive(Debug)]
pub enum CorrectionEvent {
    /// 定稿工作明细并带入比对结果
    Finalize {
        items: Vec<ReconLine>,
        discrepancies: Discrepancies,
    },
    /// 缺货确认对话框提交
    ResolveMissing { reason: String },
    /// 多货确认对话框提交
    ResolveExtra { reason: String },
    /// 取消确认对话框，回到 Idle，丢弃未提交的载荷增量
    Cancel,
    SubmitStarted,
    SubmitSucceeded,
    SubmitFailed { message: String },
    Retry,
}

impl CorrectionEvent {
    fn name(&self) -> &'static str {
        match self {
            CorrectionEvent::Finalize { .. } => "finalize",
            CorrectionEvent::ResolveMissing { .. } => "resolve_missing",
            CorrectionEvent::ResolveExtra { .. } => "resolve_extra",
            CorrectionEvent::Cancel => "cancel",
            CorrectionEvent::SubmitStarted => "submit_started",
            CorrectionEvent::SubmitSucceeded => "submit_succeeded",
            CorrectionEvent::SubmitFailed { .. } => "submit_failed",
            CorrectionEvent::Retry => "retry",
        }
    }
}

/// 纠正提交流程
///
/// 只有缺货/多货都确认过 (或本来为空) 才允许提交; 提交失败保留载荷，
/// 可直接重试，不需要重扫。
#[derive(Debug, Default)]
pub struct CorrectionFlow {
    state: CorrectionState,
    payload: CorrectionPayload,
    discrepancies: Discrepancies,
    missing_reason: Option<String>,
    extra_reason: Option<String>,
    last_failure: Option<String>,
}

impl CorrectionFlow {
    pub fn new(exit_bill_id: i64) -> Self {
        Self {
            payload: CorrectionPayload::new(exit_bill_id),
            ..Default::default()
        }
    }

    pub fn state(&self) -> CorrectionState {
        self.state
    }

    pub fn payload(&self) -> &CorrectionPayload {
        &self.payload
    }

    pub fn discrepancies(&self) -> &Discrepancies {
        &self.discrepancies
    }

    pub fn missing_reason(&self) -> Option<&str> {
        self.missing_reason.as_deref()
    }

    pub fn extra_reason(&self) -> Option<&str> {
        self.extra_reason.as_deref()
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// 应用一个事件，返回迁移后的状态; 非法 (状态, 事件) 组合报错且不改状态
    pub fn apply(&mut self, event: CorrectionEvent) -> Result<CorrectionState, ReconError> {
        use CorrectionEvent as E;
        use CorrectionState as S;

        let next = match (self.state, event) {
            (S::Idle, E::Finalize {
                items,
                discrepancies,
            }) => {
                self.payload.bill_items = items.iter().map(CorrectionItem::from).collect();
                self.payload.missing_items.clear();
                self.payload.extra_items.clear();
                self.missing_reason = None;
                self.extra_reason = None;
                self.last_failure = None;
                self.discrepancies = discrepancies;
                if !self.discrepancies.missing.is_empty() {
                    S::AwaitingMissingResolution
                } else if !self.discrepancies.extra.is_empty() {
                    S::AwaitingExtraResolution
                } else {
                    S::ReadyToSubmit
                }
            }
            (S::AwaitingMissingResolution, E::ResolveMissing { reason }) => {
                let reason = reason.trim().to_string();
                if reason.is_empty() {
                    return Err(ReconError::EmptyReason);
                }
                self.missing_reason = Some(reason);
                self.payload.missing_items = self
                    .discrepancies
                    .missing
                    .iter()
                    .map(CorrectionItem::from)
                    .collect();
                if !self.discrepancies.extra.is_empty() {
                    S::AwaitingExtraResolution
                } else {
                    S::ReadyToSubmit
                }
            }
            (S::AwaitingExtraResolution, E::ResolveExtra { reason }) => {
                let reason = reason.trim().to_string();
                if reason.is_empty() {
                    return Err(ReconError::EmptyReason);
                }
                self.extra_reason = Some(reason);
                self.payload.extra_items = self
                    .discrepancies
                    .extra
                    .iter()
                    .map(CorrectionItem::from)
                    .collect();
                S::ReadyToSubmit
            }
            (S::AwaitingMissingResolution | S::AwaitingExtraResolution, E::Cancel) => {
                self.reset_pending();
                S::Idle
            }
            (S::ReadyToSubmit, E::SubmitStarted) => S::Submitting,
            (S::Submitting, E::SubmitSucceeded) => S::Submitted,
            (S::Submitting, E::SubmitFailed { message }) => {
                self.last_failure = Some(message);
                S::Failed
            }
            (S::Failed, E::Retry) => {
                self.last_failure = None;
                S::Submitting
            }
            (state, event) => {
                return Err(ReconError::InvalidTransition {
                    state: state.as_str(),
                    event: event.name(),
                })
            }
        };

        self.state = next;
        Ok(next)
    }

    /// 丢弃未提交的载荷增量与确认信息; 工作明细本身不在这里，扫码结果保留
    fn reset_pending(&mut self) {
        self.payload.bill_items.clear();
        self.payload.missing_items.clear();
        self.payload.extra_items.clear();
        self.discrepancies = Discrepancies::default();
        self.missing_reason = None;
        self.extra_reason = None;
        self.last_failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::reconciler::reconcile;
    use bigdecimal::BigDecimal;

    fn line(variant_id: i64, qty: i64) -> ReconLine {
        ReconLine::new(
            variant_id,
            format!("variant-{}", variant_id),
            qty,
            BigDecimal::from(10),
        )
    }

    fn finalize(flow: &mut CorrectionFlow, exit: &[ReconLine], entry: &[ReconLine]) {
        let discrepancies = reconcile(exit, entry);
        flow.apply(CorrectionEvent::Finalize {
            items: entry.to_vec(),
            discrepancies,
        })
        .unwrap();
    }

    #[test]
    fn clean_bill_goes_straight_to_ready() {
        let mut flow = CorrectionFlow::new(42);
        let items = vec![line(1, 5)];
        finalize(&mut flow, &items, &items);
        assert_eq!(flow.state(), CorrectionState::ReadyToSubmit);
        assert_eq!(flow.payload().bill_items.len(), 1);
        assert!(flow.payload().missing_items.is_empty());
        assert!(flow.payload().extra_items.is_empty());
        assert!(flow.payload().broken_items.is_empty());
    }

    #[test]
    fn full_resolution_path_builds_the_payload() {
        let mut flow = CorrectionFlow::new(42);
        let exit = vec![line(1, 5), line(2, 2)];
        let entry = vec![line(1, 3), line(3, 4)];
        finalize(&mut flow, &exit, &entry);
        assert_eq!(flow.state(), CorrectionState::AwaitingMissingResolution);

        flow.apply(CorrectionEvent::ResolveMissing {
            reason: "carton damaged in transit".into(),
        })
        .unwrap();
        assert_eq!(flow.state(), CorrectionState::AwaitingExtraResolution);
        // 缺货: 1 差 2 件, 2 整行 2 件
        assert_eq!(
            flow.payload().missing_items,
            vec![
                CorrectionItem { product_variant_id: 1, quantity: 2 },
                CorrectionItem { product_variant_id: 2, quantity: 2 },
            ]
        );

        flow.apply(CorrectionEvent::ResolveExtra {
            reason: "warehouse substituted stock".into(),
        })
        .unwrap();
        assert_eq!(flow.state(), CorrectionState::ReadyToSubmit);
        assert_eq!(
            flow.payload().extra_items,
            vec![CorrectionItem { product_variant_id: 3, quantity: 4 }]
        );
        assert_eq!(flow.payload().exit_bill_id, 42);
    }

    #[test]
    fn extra_only_bill_skips_missing_dialog() {
        let mut flow = CorrectionFlow::new(7);
        let exit = vec![line(1, 5)];
        let entry = vec![line(1, 5), line(2, 1)];
        finalize(&mut flow, &exit, &entry);
        assert_eq!(flow.state(), CorrectionState::AwaitingExtraResolution);
    }

    #[test]
    fn cancel_discards_pending_payload() {
        let mut flow = CorrectionFlow::new(7);
        let exit = vec![line(1, 5)];
        let entry = vec![line(1, 3)];
        finalize(&mut flow, &exit, &entry);
        flow.apply(CorrectionEvent::Cancel).unwrap();
        assert_eq!(flow.state(), CorrectionState::Idle);
        assert!(flow.payload().bill_items.is_empty());
        assert!(flow.payload().missing_items.is_empty());
        assert!(flow.discrepancies().is_clean());
        // 取消后可以重新定稿
        finalize(&mut flow, &exit, &entry);
        assert_eq!(flow.state(), CorrectionState::AwaitingMissingResolution);
    }

    #[test]
    fn empty_reason_is_rejected_without_moving() {
        let mut flow = CorrectionFlow::new(7);
        let exit = vec![line(1, 5)];
        let entry = vec![line(1, 3)];
        finalize(&mut flow, &exit, &entry);
        let err = flow
            .apply(CorrectionEvent::ResolveMissing { reason: "  ".into() })
            .unwrap_err();
        assert!(matches!(err, ReconError::EmptyReason));
        assert_eq!(flow.state(), CorrectionState::AwaitingMissingResolution);
    }

    #[test]
    fn submit_is_blocked_until_both_resolutions() {
        let mut flow = CorrectionFlow::new(7);
        let exit = vec![line(1, 5)];
        let entry = vec![line(1, 3)];
        finalize(&mut flow, &exit, &entry);
        let err = flow.apply(CorrectionEvent::SubmitStarted).unwrap_err();
        assert!(matches!(err, ReconError::InvalidTransition { .. }));
        assert_eq!(flow.state(), CorrectionState::AwaitingMissingResolution);
    }

    #[test]
    fn failed_submit_keeps_payload_and_allows_retry() {
        let mut flow = CorrectionFlow::new(7);
        let items = vec![line(1, 5)];
        finalize(&mut flow, &items, &items);
        flow.apply(CorrectionEvent::SubmitStarted).unwrap();
        flow.apply(CorrectionEvent::SubmitFailed {
            message: "connection reset".into(),
        })
        .unwrap();
        assert_eq!(flow.state(), CorrectionState::Failed);
        assert_eq!(flow.last_failure(), Some("connection reset"));
        assert_eq!(flow.payload().bill_items.len(), 1);

        flow.apply(CorrectionEvent::Retry).unwrap();
        assert_eq!(flow.state(), CorrectionState::Submitting);
        flow.apply(CorrectionEvent::SubmitSucceeded).unwrap();
        assert_eq!(flow.state(), CorrectionState::Submitted);
    }

    #[test]
    fn submitted_is_terminal() {
        let mut flow = CorrectionFlow::new(7);
        let items = vec![line(1, 1)];
        finalize(&mut flow, &items, &items);
        flow.apply(CorrectionEvent::SubmitStarted).unwrap();
        flow.apply(CorrectionEvent::SubmitSucceeded).unwrap();
        let err = flow
            .apply(CorrectionEvent::Finalize {
                items: vec![],
                discrepancies: Discrepancies::default(),
            })
            .unwrap_err();
        assert!(matches!(err, ReconError::InvalidTransition { .. }));
    }

    #[test]
    fn re_finalize_replaces_stale_resolution() {
        let mut flow = CorrectionFlow::new(7);
        let exit = vec![line(1, 5)];
        finalize(&mut flow, &exit, &[line(1, 3)]);
        flow.apply(CorrectionEvent::Cancel).unwrap();
        // 补扫到足量后重新定稿，直接就绪
        finalize(&mut flow, &exit, &[line(1, 5)]);
        assert_eq!(flow.state(), CorrectionState::ReadyToSubmit);
        assert!(flow.payload().missing_items.is_empty());
        assert!(flow.missing_reason().is_none());
    }
}
