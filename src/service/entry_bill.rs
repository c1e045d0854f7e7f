use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use sqlx::PgPool;
use tokio::task::AbortHandle;

use crate::db::queries;
use crate::error::ReconError;
use crate::models::{
    Discrepancies, DiscrepancyRow, EntryBill, ExitBill, ExitBillItem, ExitBillSummary, ReconLine,
    ReconStats,
};
use crate::service::correction::{CorrectionEvent, CorrectionFlow, CorrectionState};
use crate::service::intake::{self, ItemAccumulator, ScanBuffer, StockIndex};
use crate::service::reconciler;

/// 单次扫码解析的反馈
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// 解析成功并计入工作明细
    Accepted {
        variant_id: i64,
        variant_name: String,
        qty: i64,
    },
    /// 加盟店库存中查不到该条码; 不改任何状态，等用户重扫
    Unrecognized { code: String },
}

/// 扫码会话快照 (轮询接口返回)
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub exit_bill_id: i64,
    pub franchise_id: i64,
    pub state: CorrectionState,
    pub items: Vec<ReconLine>,
    pub scanned_qty: i64,
    pub discrepancies: Discrepancies,
    pub missing_reason: Option<String>,
    pub extra_reason: Option<String>,
    pub last_scan: Option<ScanOutcome>,
    pub last_failure: Option<String>,
}

/// 定稿结果
#[derive(Debug, Serialize)]
pub struct FinalizeResult {
    pub state: CorrectionState,
    pub discrepancies: Discrepancies,
    pub stats: ReconStats,
}

#[derive(Debug, Serialize)]
pub struct SubmitResult {
    pub entry_bill_id: i64,
}

/// 出库单详情 (含派生状态)
#[derive(Debug, Serialize)]
pub struct ExitBillDetail {
    pub bill: ExitBill,
    pub items: Vec<ExitBillItem>,
    pub fstatus: String,
}

/// 已落库入库单详情
#[derive(Debug, Serialize)]
pub struct EntryBillView {
    pub bill: EntryBill,
    pub discrepancies: Vec<DiscrepancyRow>,
}

/// 单个出库单的扫码会话 - 入库单提交前的全部工作状态
///
/// 提交成功前只存在于内存; 会话取消或服务重启即丢弃。
struct ScanSession {
    exit_bill: ExitBill,
    exit_items: Vec<ReconLine>,
    index: StockIndex,
    buffer: ScanBuffer,
    accumulator: ItemAccumulator,
    flow: CorrectionFlow,
    last_scan: Option<ScanOutcome>,
    /// 在途静默定时器; 任一时刻至多一个
    pending_timer: Option<AbortHandle>,
    /// 定时器代次，已被替换的旧定时器触发时对不上号，直接作废
    timer_seq: u64,
}

impl ScanSession {
    /// 撤销在途定时器并使旧代次失效
    fn abort_timer(&mut self) {
        self.timer_seq = self.timer_seq.wrapping_add(1);
        if let Some(timer) = self.pending_timer.take() {
            timer.abort();
        }
    }

    /// 把缓冲内容当作一个完整条码解析; 无论成败缓冲都清空
    fn resolve_buffer(&mut self) -> Option<ScanOutcome> {
        if self.buffer.is_empty() {
            self.buffer.take();
            return None;
        }
        let code = self.buffer.take();
        let outcome = match self.index.resolve(&code) {
            Some(variant) => {
                let line = self.accumulator.record_scan(variant);
                tracing::debug!("扫码计入: 变体 {} 累计 {}", line.variant_id, line.qty);
                ScanOutcome::Accepted {
                    variant_id: line.variant_id,
                    variant_name: line.variant_name.clone(),
                    qty: line.qty,
                }
            }
            None => {
                tracing::warn!("条码无法识别: {}", code);
                ScanOutcome::Unrecognized { code }
            }
        };
        self.last_scan = Some(outcome.clone());
        Some(outcome)
    }

    fn view(&self) -> SessionView {
        SessionView {
            exit_bill_id: self.exit_bill.fid,
            franchise_id: self.exit_bill.ffranchiseid,
            state: self.flow.state(),
            items: self.accumulator.lines(),
            scanned_qty: self.accumulator.total_qty(),
            discrepancies: self.flow.discrepancies().clone(),
            missing_reason: self.flow.missing_reason().map(str::to_string),
            extra_reason: self.flow.extra_reason().map(str::to_string),
            last_scan: self.last_scan.clone(),
            last_failure: self.flow.last_failure().map(str::to_string),
        }
    }
}

/// 入库对账服务
///
/// 以出库单ID为键维护扫码会话; 会话只通过 DashMap 分片守卫访问，
/// 守卫从不跨 await 持有。
pub struct EntryBillService {
    pool: PgPool,
    sessions: Arc<DashMap<i64, ScanSession>>,
    quiescence: Duration,
}

impl EntryBillService {
    pub fn new(pool: PgPool, quiescence_ms: u64) -> Self {
        Self {
            pool,
            sessions: Arc::new(DashMap::new()),
            quiescence: Duration::from_millis(quiescence_ms),
        }
    }

    /// 出库单列表 (状态由有无关联入库单派生)
    pub async fn list_exit_bills(
        &self,
        franchise_id: Option<i64>,
    ) -> Result<Vec<ExitBillSummary>, ReconError> {
        Ok(queries::list_exit_bills(&self.pool, franchise_id).await?)
    }

    /// 出库单详情
    pub async fn exit_bill_detail(&self, exit_bill_id: i64) -> Result<ExitBillDetail, ReconError> {
        let bill = queries::get_exit_bill(&self.pool, exit_bill_id)
            .await?
            .ok_or(ReconError::ExitBillNotFound(exit_bill_id))?;
        let items = queries::list_exit_bill_items(&self.pool, exit_bill_id).await?;
        let received = queries::find_entry_bill_id(&self.pool, exit_bill_id)
            .await?
            .is_some();
        Ok(ExitBillDetail {
            bill,
            items,
            fstatus: if received { "received" } else { "pending" }.to_string(),
        })
    }

    /// 开启 (或重置) 一个扫码会话
    ///
    /// 1. 出库单必须存在且尚未关联入库单
    /// 2. 拉取应发明细和加盟店库存，建条码索引
    /// 3. 旧会话连同在途定时器一并丢弃
    pub async fn open_session(&self, exit_bill_id: i64) -> Result<SessionView, ReconError> {
        let bill = queries::get_exit_bill(&self.pool, exit_bill_id)
            .await?
            .ok_or(ReconError::ExitBillNotFound(exit_bill_id))?;
        if queries::find_entry_bill_id(&self.pool, exit_bill_id)
            .await?
            .is_some()
        {
            return Err(ReconError::AlreadyReceived(exit_bill_id));
        }

        let items = queries::list_exit_bill_items(&self.pool, exit_bill_id).await?;
        let exit_items: Vec<ReconLine> = items
            .iter()
            .map(|i| {
                ReconLine::new(
                    i.fvariantid,
                    i.fvariantname.clone(),
                    i.fqty,
                    i.funitprice.clone(),
                )
            })
            .collect();
        let stock = queries::list_franchise_stock(&self.pool, bill.ffranchiseid).await?;
        let index = StockIndex::from_variants(stock);
        tracing::info!(
            "开启扫码会话: 出库单 {}, 应发 {} 行, 库存条码 {} 条",
            exit_bill_id,
            exit_items.len(),
            index.len()
        );

        if let Some((_, mut old)) = self.sessions.remove(&exit_bill_id) {
            old.abort_timer();
        }
        let session = ScanSession {
            exit_bill: bill,
            exit_items,
            index,
            buffer: ScanBuffer::default(),
            accumulator: ItemAccumulator::default(),
            flow: CorrectionFlow::new(exit_bill_id),
            last_scan: None,
            pending_timer: None,
            timer_seq: 0,
        };
        let view = session.view();
        self.sessions.insert(exit_bill_id, session);
        Ok(view)
    }

    pub fn session_view(&self, exit_bill_id: i64) -> Result<SessionView, ReconError> {
        let session = self
            .sessions
            .get(&exit_bill_id)
            .ok_or(ReconError::SessionNotFound(exit_bill_id))?;
        Ok(session.view())
    }

    /// 接收一段扫码枪按键
    ///
    /// Enter 立即解析; 否则撤掉旧定时器，重新安排一个静默窗口的
    /// 单发定时器 (每个会话任一时刻至多一个在途)。
    pub fn push_input(
        &self,
        exit_bill_id: i64,
        keys: &str,
        enter: bool,
    ) -> Result<Option<ScanOutcome>, ReconError> {
        let mut session = self
            .sessions
            .get_mut(&exit_bill_id)
            .ok_or(ReconError::SessionNotFound(exit_bill_id))?;
        if session.flow.state() != CorrectionState::Idle {
            return Err(ReconError::InvalidTransition {
                state: session.flow.state().as_str(),
                event: "scan",
            });
        }

        session.abort_timer();
        session.buffer.push_keys(keys);

        if intake::should_resolve(0, enter, self.quiescence.as_millis() as u64) {
            return Ok(session.resolve_buffer());
        }

        if !session.buffer.is_empty() {
            let seq = session.timer_seq;
            let sessions = Arc::clone(&self.sessions);
            let delay = self.quiescence;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(mut s) = sessions.get_mut(&exit_bill_id) {
                    if s.timer_seq == seq {
                        s.pending_timer = None;
                        s.resolve_buffer();
                    }
                }
            });
            session.pending_timer = Some(handle.abort_handle());
        }
        Ok(None)
    }

    /// 工作明细数量减一; 返回剩余数量，行不存在时返回 None
    pub fn decrement_item(
        &self,
        exit_bill_id: i64,
        variant_id: i64,
    ) -> Result<Option<i64>, ReconError> {
        let mut session = self
            .sessions
            .get_mut(&exit_bill_id)
            .ok_or(ReconError::SessionNotFound(exit_bill_id))?;
        if session.flow.state() != CorrectionState::Idle {
            return Err(ReconError::InvalidTransition {
                state: session.flow.state().as_str(),
                event: "decrement",
            });
        }
        Ok(session.accumulator.decrement(variant_id))
    }

    /// 定稿工作明细: 跑比对、进入纠正流程
    pub fn finalize(&self, exit_bill_id: i64) -> Result<FinalizeResult, ReconError> {
        let mut session = self
            .sessions
            .get_mut(&exit_bill_id)
            .ok_or(ReconError::SessionNotFound(exit_bill_id))?;
        // 定稿前把缓冲里残留的输入当最后一次扫码处理
        session.abort_timer();
        session.resolve_buffer();

        let entry_lines = session.accumulator.lines();
        let discrepancies = reconciler::reconcile(&session.exit_items, &entry_lines);
        let stats = ReconStats::build(&session.exit_items, &entry_lines, &discrepancies);
        let state = session.flow.apply(CorrectionEvent::Finalize {
            items: entry_lines,
            discrepancies: discrepancies.clone(),
        })?;
        tracing::info!(
            "盘点定稿: 出库单 {}, 缺货 {} 行 / 多货 {} 行, 状态 {}",
            exit_bill_id,
            discrepancies.missing.len(),
            discrepancies.extra.len(),
            state.as_str()
        );
        Ok(FinalizeResult {
            state,
            discrepancies,
            stats,
        })
    }

    /// 缺货确认
    pub fn resolve_missing(
        &self,
        exit_bill_id: i64,
        reason: String,
    ) -> Result<CorrectionState, ReconError> {
        let mut session = self
            .sessions
            .get_mut(&exit_bill_id)
            .ok_or(ReconError::SessionNotFound(exit_bill_id))?;
        session.flow.apply(CorrectionEvent::ResolveMissing { reason })
    }

    /// 多货确认
    pub fn resolve_extra(
        &self,
        exit_bill_id: i64,
        reason: String,
    ) -> Result<CorrectionState, ReconError> {
        let mut session = self
            .sessions
            .get_mut(&exit_bill_id)
            .ok_or(ReconError::SessionNotFound(exit_bill_id))?;
        session.flow.apply(CorrectionEvent::ResolveExtra { reason })
    }

    /// 取消确认对话框，回到可继续扫码的 Idle 状态 (扫码结果保留)
    pub fn cancel_resolution(&self, exit_bill_id: i64) -> Result<CorrectionState, ReconError> {
        let mut session = self
            .sessions
            .get_mut(&exit_bill_id)
            .ok_or(ReconError::SessionNotFound(exit_bill_id))?;
        session.flow.apply(CorrectionEvent::Cancel)
    }

    /// 提交入库单
    ///
    /// 只允许从 ReadyToSubmit (或 Failed 重试) 发起。落库失败时载荷与
    /// 工作明细原样保留，错误信息原文返回，用户可直接重试。
    pub async fn submit(&self, exit_bill_id: i64) -> Result<SubmitResult, ReconError> {
        // 守卫内完成状态迁移并拷出载荷，await 期间不持有分片锁
        let (payload, missing_reason, extra_reason, franchise_id) = {
            let mut session = self
                .sessions
                .get_mut(&exit_bill_id)
                .ok_or(ReconError::SessionNotFound(exit_bill_id))?;
            match session.flow.state() {
                CorrectionState::Failed => session.flow.apply(CorrectionEvent::Retry)?,
                _ => session.flow.apply(CorrectionEvent::SubmitStarted)?,
            };
            (
                session.flow.payload().clone(),
                session.flow.missing_reason().map(str::to_string),
                session.flow.extra_reason().map(str::to_string),
                session.exit_bill.ffranchiseid,
            )
        };

        match queries::insert_entry_bill(
            &self.pool,
            &payload,
            franchise_id,
            missing_reason.as_deref(),
            extra_reason.as_deref(),
        )
        .await
        {
            Ok(entry_bill_id) => {
                if let Some((_, mut session)) = self.sessions.remove(&exit_bill_id) {
                    let _ = session.flow.apply(CorrectionEvent::SubmitSucceeded);
                    session.abort_timer();
                }
                tracing::info!(
                    "入库单 {} 创建成功, 关联出库单 {}",
                    entry_bill_id,
                    exit_bill_id
                );
                Ok(SubmitResult { entry_bill_id })
            }
            Err(e) => {
                let message = e.to_string();
                if let Some(mut session) = self.sessions.get_mut(&exit_bill_id) {
                    let _ = session.flow.apply(CorrectionEvent::SubmitFailed {
                        message: message.clone(),
                    });
                }
                tracing::error!("入库单提交失败: 出库单 {}, {}", exit_bill_id, message);
                Err(ReconError::SubmitFailed(message))
            }
        }
    }

    /// 关闭会话: 工作明细清空、在途定时器撤销
    pub fn cancel_session(&self, exit_bill_id: i64) -> Result<(), ReconError> {
        let (_, mut session) = self
            .sessions
            .remove(&exit_bill_id)
            .ok_or(ReconError::SessionNotFound(exit_bill_id))?;
        session.abort_timer();
        tracing::info!("会话取消: 出库单 {}", exit_bill_id);
        Ok(())
    }

    /// 已落库入库单详情 (提交成功后查询用)
    pub async fn entry_bill_detail(&self, exit_bill_id: i64) -> Result<EntryBillView, ReconError> {
        let bill = queries::get_entry_bill(&self.pool, exit_bill_id)
            .await?
            .ok_or(ReconError::EntryBillNotFound(exit_bill_id))?;
        let discrepancies =
            queries::list_entry_bill_discrepancies(&self.pool, exit_bill_id).await?;
        Ok(EntryBillView {
            bill,
            discrepancies,
        })
    }

    /// 已落库差异的 CSV 导出
    pub async fn discrepancy_csv(&self, exit_bill_id: i64) -> Result<String, ReconError> {
        queries::find_entry_bill_id(&self.pool, exit_bill_id)
            .await?
            .ok_or(ReconError::EntryBillNotFound(exit_bill_id))?;
        let rows = queries::list_entry_bill_discrepancies(&self.pool, exit_bill_id).await?;
        queries::discrepancies_to_csv(&rows).map_err(|e| ReconError::Export(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StockVariant;
    use bigdecimal::BigDecimal;
    use chrono::Utc;

    fn test_service() -> Arc<EntryBillService> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/erp_billrecon_test")
            .expect("lazy pool");
        Arc::new(EntryBillService::new(pool, 1000))
    }

    fn variant(id: i64, code: &str, price: i64) -> StockVariant {
        StockVariant {
            variant_id: id,
            qr_code: code.to_string(),
            variant_name: format!("variant-{}", id),
            unit_price: BigDecimal::from(price),
        }
    }

    /// 不经过数据库直接塞一个会话进去
    fn seed_session(service: &EntryBillService, exit_bill_id: i64, expected_qty: i64) {
        let exit_items = vec![ReconLine::new(1, "variant-1", expected_qty, BigDecimal::from(10))];
        let index = StockIndex::from_variants(vec![
            variant(1, "QR-001", 10),
            variant(2, "QR-002", 5),
        ]);
        let session = ScanSession {
            exit_bill: ExitBill {
                fid: exit_bill_id,
                ffranchiseid: 99,
                ftotalamount: BigDecimal::from(expected_qty * 10),
                fcreatetime: Utc::now(),
            },
            exit_items,
            index,
            buffer: ScanBuffer::default(),
            accumulator: ItemAccumulator::default(),
            flow: CorrectionFlow::new(exit_bill_id),
            last_scan: None,
            pending_timer: None,
            timer_seq: 0,
        };
        service.sessions.insert(exit_bill_id, session);
    }

    #[tokio::test]
    async fn enter_resolves_inline() {
        let service = test_service();
        seed_session(&service, 1, 5);
        let outcome = service.push_input(1, "QR-001", true).unwrap();
        assert!(matches!(outcome, Some(ScanOutcome::Accepted { qty: 1, .. })));
        let view = service.session_view(1).unwrap();
        assert_eq!(view.scanned_qty, 1);
    }

    #[tokio::test]
    async fn unrecognized_code_leaves_state_untouched() {
        let service = test_service();
        seed_session(&service, 1, 5);
        let outcome = service.push_input(1, "NO-SUCH", true).unwrap();
        assert!(matches!(outcome, Some(ScanOutcome::Unrecognized { .. })));
        let view = service.session_view(1).unwrap();
        assert!(view.items.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_resolves_split_input() {
        let service = test_service();
        seed_session(&service, 1, 5);
        // 条码分两段到达，都不带 Enter
        assert!(service.push_input(1, "QR-", false).unwrap().is_none());
        assert!(service.push_input(1, "001", false).unwrap().is_none());
        // 推进虚拟时钟越过静默窗口，单发定时器触发解析
        tokio::time::sleep(Duration::from_millis(1100)).await;
        tokio::task::yield_now().await;
        let view = service.session_view(1).unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].variant_id, 1);
        assert_eq!(view.items[0].qty, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_keystroke_replaces_pending_timer() {
        let service = test_service();
        seed_session(&service, 1, 5);
        service.push_input(1, "QR-", false).unwrap();
        // 800ms 后又来一段按键: 旧定时器作废，窗口重新计时
        tokio::time::sleep(Duration::from_millis(800)).await;
        service.push_input(1, "001", false).unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;
        tokio::task::yield_now().await;
        // 距第二段按键只有 800ms，尚不应解析
        assert!(service.session_view(1).unwrap().items.is_empty());
        tokio::time::sleep(Duration::from_millis(300)).await;
        tokio::task::yield_now().await;
        assert_eq!(service.session_view(1).unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn working_list_is_frozen_during_correction_flow() {
        let service = test_service();
        seed_session(&service, 1, 5);
        service.push_input(1, "QR-001", true).unwrap();
        let result = service.finalize(1).unwrap();
        assert_eq!(result.state, CorrectionState::AwaitingMissingResolution);
        let err = service.push_input(1, "QR-001", true).unwrap_err();
        assert!(matches!(err, ReconError::InvalidTransition { .. }));
        // 取消对话框后可以继续扫
        service.cancel_resolution(1).unwrap();
        assert!(service.push_input(1, "QR-001", true).unwrap().is_some());
    }

    #[tokio::test]
    async fn finalize_flushes_leftover_buffer() {
        let service = test_service();
        seed_session(&service, 1, 1);
        service.push_input(1, "QR-001", false).unwrap();
        let result = service.finalize(1).unwrap();
        // 缓冲里的条码在定稿时被计入，账目持平
        assert_eq!(result.state, CorrectionState::ReadyToSubmit);
        assert!(result.discrepancies.is_clean());
        assert_eq!(result.stats.scanned_qty, 1);
    }

    #[tokio::test]
    async fn cancel_session_drops_everything() {
        let service = test_service();
        seed_session(&service, 1, 5);
        service.push_input(1, "QR-001", true).unwrap();
        service.cancel_session(1).unwrap();
        assert!(matches!(
            service.session_view(1).unwrap_err(),
            ReconError::SessionNotFound(1)
        ));
    }
}
