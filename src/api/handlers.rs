use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ReconError;
use crate::models::{Discrepancies, ExitBillSummary, ReconStats};
use crate::service::correction::CorrectionState;
use crate::service::entry_bill::{
    EntryBillService, EntryBillView, ExitBillDetail, ScanOutcome, SessionView, SubmitResult,
};

/// 请求体: 扫码枪按键片段
#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub keys: String,
    /// 是否以 Enter 终止 (扫码枪常见配置)
    #[serde(default)]
    pub enter: bool,
}

/// 请求体: 差异确认
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ExitBillQuery {
    pub franchise_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ExitBillListResponse {
    pub success: bool,
    pub message: String,
    pub bills: Vec<ExitBillSummary>,
}

#[derive(Debug, Serialize)]
pub struct ExitBillDetailResponse {
    pub success: bool,
    pub message: String,
    pub detail: ExitBillDetail,
}

#[derive(Debug, Serialize)]
pub struct EntryBillDetailResponse {
    pub success: bool,
    pub message: String,
    pub detail: EntryBillView,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub success: bool,
    pub message: String,
    pub session: SessionView,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub success: bool,
    pub message: String,
    /// None 表示按键已缓冲，等静默窗口到期解析
    pub outcome: Option<ScanOutcome>,
}

#[derive(Debug, Serialize)]
pub struct DecrementResponse {
    pub success: bool,
    pub message: String,
    pub qty_left: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    pub success: bool,
    pub message: String,
    pub state: CorrectionState,
    pub discrepancies: Discrepancies,
    pub stats: ReconStats,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub success: bool,
    pub message: String,
    pub state: CorrectionState,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub message: String,
    pub entry_bill_id: i64,
}

#[derive(Debug, Serialize)]
pub struct PlainResponse {
    pub success: bool,
    pub message: String,
}

/// 错误 -> HTTP 状态码映射
fn error_response(err: ReconError) -> Response {
    let status = match &err {
        ReconError::UnknownBarcode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ReconError::ExitBillNotFound(_)
        | ReconError::SessionNotFound(_)
        | ReconError::EntryBillNotFound(_) => StatusCode::NOT_FOUND,
        ReconError::AlreadyReceived(_) | ReconError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        ReconError::EmptyReason => StatusCode::BAD_REQUEST,
        ReconError::SubmitFailed(_) | ReconError::Export(_) | ReconError::Db(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorBody {
            success: false,
            message: err.to_string(),
        }),
    )
        .into_response()
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 出库单列表
pub async fn list_exit_bills(
    State(service): State<Arc<EntryBillService>>,
    Query(query): Query<ExitBillQuery>,
) -> Response {
    match service.list_exit_bills(query.franchise_id).await {
        Ok(bills) => (
            StatusCode::OK,
            Json(ExitBillListResponse {
                success: true,
                message: format!("{} exit bills", bills.len()),
                bills,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// 出库单详情
pub async fn get_exit_bill(
    State(service): State<Arc<EntryBillService>>,
    Path(exit_bill_id): Path<i64>,
) -> Response {
    match service.exit_bill_detail(exit_bill_id).await {
        Ok(detail) => (
            StatusCode::OK,
            Json(ExitBillDetailResponse {
                success: true,
                message: format!("exit bill {} ({})", exit_bill_id, detail.fstatus),
                detail,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// 已落库入库单详情
pub async fn get_entry_bill(
    State(service): State<Arc<EntryBillService>>,
    Path(exit_bill_id): Path<i64>,
) -> Response {
    match service.entry_bill_detail(exit_bill_id).await {
        Ok(detail) => (
            StatusCode::OK,
            Json(EntryBillDetailResponse {
                success: true,
                message: format!("entry bill {} for exit bill {}", detail.bill.fid, exit_bill_id),
                detail,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// 开启 (或重置) 扫码会话
pub async fn open_session(
    State(service): State<Arc<EntryBillService>>,
    Path(exit_bill_id): Path<i64>,
) -> Response {
    match service.open_session(exit_bill_id).await {
        Ok(session) => (
            StatusCode::OK,
            Json(SessionResponse {
                success: true,
                message: format!("scan session open for exit bill {}", exit_bill_id),
                session,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// 会话快照
pub async fn session_view(
    State(service): State<Arc<EntryBillService>>,
    Path(exit_bill_id): Path<i64>,
) -> Response {
    match service.session_view(exit_bill_id) {
        Ok(session) => (
            StatusCode::OK,
            Json(SessionResponse {
                success: true,
                message: format!("session state: {}", session.state.as_str()),
                session,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// 扫码输入
pub async fn scan(
    State(service): State<Arc<EntryBillService>>,
    Path(exit_bill_id): Path<i64>,
    Json(req): Json<ScanRequest>,
) -> Response {
    match service.push_input(exit_bill_id, &req.keys, req.enter) {
        // 库存查不到的条码按可恢复错误返回，提示重扫
        Ok(Some(ScanOutcome::Unrecognized { code })) => {
            error_response(ReconError::UnknownBarcode(code))
        }
        Ok(Some(outcome)) => {
            let message = match &outcome {
                ScanOutcome::Accepted {
                    variant_name, qty, ..
                } => format!("accepted {} x{}", variant_name, qty),
                ScanOutcome::Unrecognized { code } => format!("unrecognized {}", code),
            };
            (
                StatusCode::OK,
                Json(ScanResponse {
                    success: true,
                    message,
                    outcome: Some(outcome),
                }),
            )
                .into_response()
        }
        Ok(None) => (
            StatusCode::OK,
            Json(ScanResponse {
                success: true,
                message: "input buffered".to_string(),
                outcome: None,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// 工作明细数量减一
pub async fn decrement_item(
    State(service): State<Arc<EntryBillService>>,
    Path((exit_bill_id, variant_id)): Path<(i64, i64)>,
) -> Response {
    match service.decrement_item(exit_bill_id, variant_id) {
        Ok(Some(qty_left)) => (
            StatusCode::OK,
            Json(DecrementResponse {
                success: true,
                message: if qty_left == 0 {
                    format!("variant {} removed", variant_id)
                } else {
                    format!("variant {} now x{}", variant_id, qty_left)
                },
                qty_left: Some(qty_left),
            }),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(DecrementResponse {
                success: false,
                message: format!("no working line for variant {}", variant_id),
                qty_left: None,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// 定稿并比对
pub async fn finalize(
    State(service): State<Arc<EntryBillService>>,
    Path(exit_bill_id): Path<i64>,
) -> Response {
    match service.finalize(exit_bill_id) {
        Ok(result) => (
            StatusCode::OK,
            Json(FinalizeResponse {
                success: true,
                message: format!(
                    "{} missing / {} extra lines",
                    result.discrepancies.missing.len(),
                    result.discrepancies.extra.len()
                ),
                state: result.state,
                discrepancies: result.discrepancies,
                stats: result.stats,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// 缺货确认
pub async fn resolve_missing(
    State(service): State<Arc<EntryBillService>>,
    Path(exit_bill_id): Path<i64>,
    Json(req): Json<ResolveRequest>,
) -> Response {
    state_response(service.resolve_missing(exit_bill_id, req.reason))
}

/// 多货确认
pub async fn resolve_extra(
    State(service): State<Arc<EntryBillService>>,
    Path(exit_bill_id): Path<i64>,
    Json(req): Json<ResolveRequest>,
) -> Response {
    state_response(service.resolve_extra(exit_bill_id, req.reason))
}

/// 取消确认对话框 (扫码结果保留)
pub async fn cancel_resolution(
    State(service): State<Arc<EntryBillService>>,
    Path(exit_bill_id): Path<i64>,
) -> Response {
    state_response(service.cancel_resolution(exit_bill_id))
}

fn state_response(result: Result<CorrectionState, ReconError>) -> Response {
    match result {
        Ok(state) => (
            StatusCode::OK,
            Json(StateResponse {
                success: true,
                message: format!("state: {}", state.as_str()),
                state,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// 提交入库单
pub async fn submit(
    State(service): State<Arc<EntryBillService>>,
    Path(exit_bill_id): Path<i64>,
) -> Response {
    match service.submit(exit_bill_id).await {
        Ok(SubmitResult { entry_bill_id }) => (
            StatusCode::OK,
            Json(SubmitResponse {
                success: true,
                message: format!(
                    "entry bill {} created for exit bill {}",
                    entry_bill_id, exit_bill_id
                ),
                entry_bill_id,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// 关闭会话
pub async fn cancel_session(
    State(service): State<Arc<EntryBillService>>,
    Path(exit_bill_id): Path<i64>,
) -> Response {
    match service.cancel_session(exit_bill_id) {
        Ok(()) => (
            StatusCode::OK,
            Json(PlainResponse {
                success: true,
                message: format!("session for exit bill {} cancelled", exit_bill_id),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// 已落库差异的 CSV 导出
pub async fn discrepancy_csv(
    State(service): State<Arc<EntryBillService>>,
    Path(exit_bill_id): Path<i64>,
) -> Response {
    match service.discrepancy_csv(exit_bill_id).await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}
