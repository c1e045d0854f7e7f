use std::collections::HashMap;

use crate::models::{Discrepancies, ReconLine};

/// 出入库比对 (核心算法)
///
/// 两趟相互独立的扫描: 缺货以出库单为基准，多货以扫码结果为基准。
/// 同一张单可以同时缺 A 货又多 B 货，所以两个列表必须分开推导，
/// 不能合成一趟 diff。先按变体ID各建一次索引，整体 O(n+m)。
pub fn reconcile(exit_items: &[ReconLine], entry_items: &[ReconLine]) -> Discrepancies {
    let exit_by_variant: HashMap<i64, &ReconLine> =
        exit_items.iter().map(|l| (l.variant_id, l)).collect();
    let entry_by_variant: HashMap<i64, &ReconLine> =
        entry_items.iter().map(|l| (l.variant_id, l)).collect();

    // 缺货检测: 应发 - 实收，只记差额
    let mut missing = Vec::new();
    for expected in exit_items {
        let actual_qty = entry_by_variant
            .get(&expected.variant_id)
            .map(|l| l.qty)
            .unwrap_or(0);
        let shortfall = expected.qty - actual_qty;
        if shortfall > 0 {
            missing.push(ReconLine::new(
                expected.variant_id,
                expected.variant_name.clone(),
                shortfall,
                expected.unit_price.clone(),
            ));
        }
    }

    // 多货检测: 实收 - 应发，只记超出部分; 出库单上没有的变体整量算多货
    let mut extra = Vec::new();
    for scanned in entry_items {
        let expected_qty = exit_by_variant
            .get(&scanned.variant_id)
            .map(|l| l.qty)
            .unwrap_or(0);
        let surplus = scanned.qty - expected_qty;
        if surplus > 0 {
            extra.push(ReconLine::new(
                scanned.variant_id,
                scanned.variant_name.clone(),
                surplus,
                scanned.unit_price.clone(),
            ));
        }
    }

    Discrepancies { missing, extra }
}
