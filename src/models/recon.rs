use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// 盘点明细行 - 应发(出库单)与实收(扫码累计)共用的行结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconLine {
    pub variant_id: i64,
    pub variant_name: String,
    pub qty: i64,
    pub unit_price: BigDecimal,
    pub amount: BigDecimal,
}

impl ReconLine {
    pub fn new(
        variant_id: i64,
        variant_name: impl Into<String>,
        qty: i64,
        unit_price: BigDecimal,
    ) -> Self {
        let amount = unit_price.clone() * BigDecimal::from(qty);
        Self {
            variant_id,
            variant_name: variant_name.into(),
            qty,
            unit_price,
            amount,
        }
    }
}

/// 差异集合 - 由两份明细即时推导，不独立落库
///
/// missing 与 extra 互相独立: 同一张单可以同时缺 A 货多 B 货，
/// 两个列表分别从各自的来源明细推导。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Discrepancies {
    pub missing: Vec<ReconLine>,
    pub extra: Vec<ReconLine>,
}

impl Discrepancies {
    /// 无任何差异
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// 盘点统计信息
#[derive(Debug, Clone, Serialize)]
pub struct ReconStats {
    pub expected_lines: usize,
    pub expected_qty: i64,
    pub scanned_lines: usize,
    pub scanned_qty: i64,
    pub missing_lines: usize,
    pub missing_qty: i64,
    pub extra_lines: usize,
    pub extra_qty: i64,
}

impl ReconStats {
    pub fn build(
        exit_items: &[ReconLine],
        entry_items: &[ReconLine],
        discrepancies: &Discrepancies,
    ) -> Self {
        let sum = |lines: &[ReconLine]| lines.iter().map(|l| l.qty).sum();
        Self {
            expected_lines: exit_items.len(),
            expected_qty: sum(exit_items),
            scanned_lines: entry_items.len(),
            scanned_qty: sum(entry_items),
            missing_lines: discrepancies.missing.len(),
            missing_qty: sum(&discrepancies.missing),
            extra_lines: discrepancies.extra.len(),
            extra_qty: sum(&discrepancies.extra),
        }
    }
}
