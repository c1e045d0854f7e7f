use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 加盟店库存变体 (StockVariant) - 条码索引的数据源
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StockVariant {
    pub variant_id: i64,
    pub qr_code: String,
    pub variant_name: String,
    pub unit_price: BigDecimal,
}
