use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 出库单主表 (ExitBill) - 发货方创建的权威清单，收货侧只读
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExitBill {
    pub fid: i64,
    pub ffranchiseid: i64,
    pub ftotalamount: BigDecimal,
    pub fcreatetime: DateTime<Utc>,
}

/// 出库单明细表 (ExitBillItem)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExitBillItem {
    pub fid: i64,            // 关联出库单ID
    pub fentryid: i64,       // 明细行ID
    pub fvariantid: i64,     // 商品变体ID (SKU)
    pub fvariantname: String,
    pub fqty: i64,           // 应发数量
    pub funitprice: BigDecimal,
}

/// 出库单列表行 - fstatus 由有无关联入库单派生，不落库
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExitBillSummary {
    pub fid: i64,
    pub ffranchiseid: i64,
    pub ftotalamount: BigDecimal,
    pub fcreatetime: DateTime<Utc>,
    pub fstatus: String, // pending / received
}
