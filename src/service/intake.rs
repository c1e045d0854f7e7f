use indexmap::IndexMap;
use std::collections::HashMap;

use crate::models::{ReconLine, StockVariant};

/// 默认静默窗口 (毫秒)
///
/// 扫码枪逐字符输入，停顿超过该阈值才把缓冲内容当作一个完整条码去解析，
/// 避免解析到半截条码。
pub const DEFAULT_QUIESCENCE_MS: u64 = 1000;

/// 静默判定: 收到终止符(Enter) 或空闲达到阈值，二者先到为准
///
/// 纯函数，与真实定时器解耦，方便单测。
pub fn should_resolve(idle_ms: u64, terminator: bool, quiescence_ms: u64) -> bool {
    terminator || idle_ms >= quiescence_ms
}

/// 扫码枪原始输入缓冲
///
/// 每次解析尝试 (无论成败) 都清空缓冲。
#[derive(Debug, Default)]
pub struct ScanBuffer {
    buf: String,
}

impl ScanBuffer {
    pub fn push_keys(&mut self, keys: &str) {
        self.buf.push_str(keys);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.trim().is_empty()
    }

    /// 取出缓冲内容并清空; 扫码时序问题常带尾部空白/控制符，一并剔除
    pub fn take(&mut self) -> String {
        let raw = std::mem::take(&mut self.buf);
        raw.trim_matches(|c: char| c.is_whitespace() || c.is_control())
            .to_string()
    }
}

/// 条码索引: qr_code -> 库存变体
#[derive(Debug, Default)]
pub struct StockIndex {
    by_code: HashMap<String, StockVariant>,
}

impl StockIndex {
    pub fn from_variants(variants: Vec<StockVariant>) -> Self {
        let by_code = variants
            .into_iter()
            .map(|v| (v.qr_code.clone(), v))
            .collect();
        Self { by_code }
    }

    pub fn resolve(&self, code: &str) -> Option<&StockVariant> {
        self.by_code.get(code)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

/// 工作明细累加器 - 按首次扫码顺序保序 (IndexMap)
///
/// 同一变体重复扫码只加数量不加行; 不在出库单上的变体照常接受，
/// 留给比对阶段判定为多货，只有库存里完全查不到的条码才拒绝。
#[derive(Debug, Default)]
pub struct ItemAccumulator {
    lines: IndexMap<i64, ReconLine>,
}

impl ItemAccumulator {
    /// 记录一次成功解析的扫码: 已有行数量+1、金额累加单价，否则新建数量为1的行
    pub fn record_scan(&mut self, variant: &StockVariant) -> &ReconLine {
        self.lines
            .entry(variant.variant_id)
            .and_modify(|line| {
                line.qty += 1;
                line.amount += &variant.unit_price;
            })
            .or_insert_with(|| {
                ReconLine::new(
                    variant.variant_id,
                    variant.variant_name.clone(),
                    1,
                    variant.unit_price.clone(),
                )
            })
    }

    /// 数量减一; 减到 0 时整行移除，不允许留下 0/负数量的行
    ///
    /// 返回剩余数量，行不存在时返回 None。
    pub fn decrement(&mut self, variant_id: i64) -> Option<i64> {
        let line = self.lines.get_mut(&variant_id)?;
        if line.qty <= 1 {
            self.lines.shift_remove(&variant_id);
            Some(0)
        } else {
            line.qty -= 1;
            line.amount -= &line.unit_price;
            Some(line.qty)
        }
    }

    pub fn lines(&self) -> Vec<ReconLine> {
        self.lines.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total_qty(&self) -> i64 {
        self.lines.values().map(|l| l.qty).sum()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn variant(id: i64, code: &str, price: i64) -> StockVariant {
        StockVariant {
            variant_id: id,
            qr_code: code.to_string(),
            variant_name: format!("variant-{}", id),
            unit_price: BigDecimal::from(price),
        }
    }

    #[test]
    fn terminator_resolves_immediately() {
        assert!(should_resolve(0, true, DEFAULT_QUIESCENCE_MS));
    }

    #[test]
    fn quiescence_threshold_is_inclusive() {
        assert!(!should_resolve(999, false, 1000));
        assert!(should_resolve(1000, false, 1000));
        assert!(should_resolve(1500, false, 1000));
    }

    #[test]
    fn buffer_strips_trailing_noise() {
        let mut buf = ScanBuffer::default();
        buf.push_keys("QR-001");
        buf.push_keys("\r\n");
        assert_eq!(buf.take(), "QR-001");
        assert!(buf.is_empty());
    }

    #[test]
    fn take_clears_buffer_even_when_blank() {
        let mut buf = ScanBuffer::default();
        buf.push_keys("   ");
        assert!(buf.is_empty());
        assert_eq!(buf.take(), "");
    }

    #[test]
    fn repeated_scans_accumulate_one_line() {
        let mut acc = ItemAccumulator::default();
        let v = variant(1, "QR-001", 10);
        for _ in 0..5 {
            acc.record_scan(&v);
        }
        assert_eq!(acc.len(), 1);
        let lines = acc.lines();
        assert_eq!(lines[0].qty, 5);
        assert_eq!(lines[0].amount, BigDecimal::from(50));
    }

    #[test]
    fn scan_order_is_preserved() {
        let mut acc = ItemAccumulator::default();
        acc.record_scan(&variant(3, "QR-003", 1));
        acc.record_scan(&variant(1, "QR-001", 1));
        acc.record_scan(&variant(3, "QR-003", 1));
        acc.record_scan(&variant(2, "QR-002", 1));
        let ids: Vec<i64> = acc.lines().iter().map(|l| l.variant_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn decrement_at_one_removes_the_line() {
        let mut acc = ItemAccumulator::default();
        acc.record_scan(&variant(1, "QR-001", 10));
        assert_eq!(acc.decrement(1), Some(0));
        assert!(acc.is_empty());
        // 不存在的行
        assert_eq!(acc.decrement(1), None);
    }

    #[test]
    fn decrement_keeps_amount_in_step() {
        let mut acc = ItemAccumulator::default();
        let v = variant(1, "QR-001", 7);
        acc.record_scan(&v);
        acc.record_scan(&v);
        acc.record_scan(&v);
        assert_eq!(acc.decrement(1), Some(2));
        let lines = acc.lines();
        assert_eq!(lines[0].qty, 2);
        assert_eq!(lines[0].amount, BigDecimal::from(14));
    }

    #[test]
    fn unknown_code_resolves_to_none() {
        let index = StockIndex::from_variants(vec![variant(1, "QR-001", 10)]);
        assert!(index.resolve("QR-999").is_none());
        assert!(index.resolve("QR-001").is_some());
    }
}
