use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::ReconLine;

/// 提交载荷明细项 - 线上格式 {product_variant_id, quantity}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionItem {
    pub product_variant_id: i64,
    pub quantity: i64,
}

impl From<&ReconLine> for CorrectionItem {
    fn from(line: &ReconLine) -> Self {
        Self {
            product_variant_id: line.variant_id,
            quantity: line.qty,
        }
    }
}

/// 入库纠正提交载荷 (CorrectionPayload)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrectionPayload {
    pub exit_bill_id: i64,
    pub bill_items: Vec<CorrectionItem>,
    pub missing_items: Vec<CorrectionItem>,
    pub extra_items: Vec<CorrectionItem>,
    pub broken_items: Vec<CorrectionItem>, // 预留: 破损登记，当前恒为空
}

impl CorrectionPayload {
    pub fn new(exit_bill_id: i64) -> Self {
        Self {
            exit_bill_id,
            ..Default::default()
        }
    }

    /// 展开为落库行，fkind 区分四类明细
    pub fn item_records(&self) -> Vec<EntryBillItemRecord> {
        let expand = |items: &[CorrectionItem], kind: ItemKind| {
            items
                .iter()
                .map(|i| EntryBillItemRecord {
                    fvariantid: i.product_variant_id,
                    fqty: i.quantity,
                    fkind: kind,
                })
                .collect::<Vec<_>>()
        };
        let mut records = expand(&self.bill_items, ItemKind::Bill);
        records.extend(expand(&self.missing_items, ItemKind::Missing));
        records.extend(expand(&self.extra_items, ItemKind::Extra));
        records.extend(expand(&self.broken_items, ItemKind::Broken));
        records
    }
}

/// 明细类别 - 对应 t_erp_entry_bill_item.fkind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Bill,
    Missing,
    Extra,
    Broken,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Bill => "bill",
            ItemKind::Missing => "missing",
            ItemKind::Extra => "extra",
            ItemKind::Broken => "broken",
        }
    }
}

/// 入库单明细落库行
#[derive(Debug, Clone)]
pub struct EntryBillItemRecord {
    pub fvariantid: i64,
    pub fqty: i64,
    pub fkind: ItemKind,
}

/// 入库单主表 (EntryBill) - 提交后冻结，与出库单 1:1
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EntryBill {
    pub fid: i64,
    pub fexitbillid: i64,
    pub ffranchiseid: i64,
    pub fmissingreason: Option<String>,
    pub fextrareason: Option<String>,
    pub fcreatetime: DateTime<Utc>,
}

/// 差异导出行 (CSV 用)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DiscrepancyRow {
    pub variant_id: i64,
    pub variant_name: String,
    pub qty: i64,
    pub kind: String,
}
