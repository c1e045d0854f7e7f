use thiserror::Error;

/// 对账流程错误
///
/// 所有错误都是可恢复的: 条码不识别可重扫，提交失败保留载荷可重试。
#[derive(Debug, Error)]
pub enum ReconError {
    /// 条码在加盟店库存中完全不存在 (不等于不在出库单上)
    #[error("barcode not recognized: {0}")]
    UnknownBarcode(String),

    #[error("exit bill {0} not found")]
    ExitBillNotFound(i64),

    #[error("no open scan session for exit bill {0}")]
    SessionNotFound(i64),

    #[error("no entry bill recorded for exit bill {0}")]
    EntryBillNotFound(i64),

    /// 出库单已有关联入库单，不允许重复收货
    #[error("exit bill {0} already has an entry bill")]
    AlreadyReceived(i64),

    /// 状态机前置条件不满足 (例如差异未确认就提交)
    #[error("operation '{event}' not allowed in state '{state}'")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },

    #[error("a non-empty reason is required to resolve discrepancies")]
    EmptyReason,

    /// 提交落库失败; 工作明细与载荷原样保留，可直接重试
    #[error("entry bill submission failed: {0}")]
    SubmitFailed(String),

    #[error("csv export failed: {0}")]
    Export(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}
