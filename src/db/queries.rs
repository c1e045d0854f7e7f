use chrono::Utc;
use sqlx::PgPool;

use crate::models::{
    CorrectionPayload, DiscrepancyRow, EntryBill, ExitBill, ExitBillItem, ExitBillSummary,
    StockVariant,
};

/// 查询出库单主表
pub async fn get_exit_bill(
    pool: &PgPool,
    exit_bill_id: i64,
) -> Result<Option<ExitBill>, sqlx::Error> {
    sqlx::query_as::<_, ExitBill>(
        r#"
        SELECT fid, ffranchiseid, ftotalamount, fcreatetime
        FROM t_erp_exit_bill
        WHERE fid = $1
        "#,
    )
    .bind(exit_bill_id)
    .fetch_optional(pool)
    .await
}

/// 出库单列表 (fstatus 由有无关联入库单派生)
pub async fn list_exit_bills(
    pool: &PgPool,
    franchise_id: Option<i64>,
) -> Result<Vec<ExitBillSummary>, sqlx::Error> {
    sqlx::query_as::<_, ExitBillSummary>(
        r#"
        SELECT eb.fid, eb.ffranchiseid, eb.ftotalamount, eb.fcreatetime,
               CASE WHEN nb.fid IS NULL THEN 'pending' ELSE 'received' END AS fstatus
        FROM t_erp_exit_bill eb
        LEFT JOIN t_erp_entry_bill nb ON nb.fexitbillid = eb.fid
        WHERE ($1::bigint IS NULL OR eb.ffranchiseid = $1)
        ORDER BY eb.fcreatetime DESC
        "#,
    )
    .bind(franchise_id)
    .fetch_all(pool)
    .await
}

/// 查询出库单明细列表
pub async fn list_exit_bill_items(
    pool: &PgPool,
    exit_bill_id: i64,
) -> Result<Vec<ExitBillItem>, sqlx::Error> {
    sqlx::query_as::<_, ExitBillItem>(
        r#"
        SELECT fid, fentryid, fvariantid, fvariantname, fqty, funitprice
        FROM t_erp_exit_bill_item
        WHERE fid = $1
        ORDER BY fentryid
        "#,
    )
    .bind(exit_bill_id)
    .fetch_all(pool)
    .await
}

/// 查出库单关联的入库单 (1:1)
pub async fn get_entry_bill(
    pool: &PgPool,
    exit_bill_id: i64,
) -> Result<Option<EntryBill>, sqlx::Error> {
    sqlx::query_as::<_, EntryBill>(
        r#"
        SELECT fid, fexitbillid, ffranchiseid, fmissingreason, fextrareason, fcreatetime
        FROM t_erp_entry_bill
        WHERE fexitbillid = $1
        "#,
    )
    .bind(exit_bill_id)
    .fetch_optional(pool)
    .await
}

/// 查出库单关联的入库单ID (1:1, 有则表示已收货)
pub async fn find_entry_bill_id(
    pool: &PgPool,
    exit_bill_id: i64,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT fid
        FROM t_erp_entry_bill
        WHERE fexitbillid = $1
        "#,
    )
    .bind(exit_bill_id)
    .fetch_optional(pool)
    .await
}

/// 加盟店库存变体 (条码索引数据源)
pub async fn list_franchise_stock(
    pool: &PgPool,
    franchise_id: i64,
) -> Result<Vec<StockVariant>, sqlx::Error> {
    sqlx::query_as::<_, StockVariant>(
        r#"
        SELECT fvariantid AS variant_id,
               fqrcode AS qr_code,
               fvariantname AS variant_name,
               funitprice AS unit_price
        FROM t_erp_franchise_stock
        WHERE ffranchiseid = $1
        "#,
    )
    .bind(franchise_id)
    .fetch_all(pool)
    .await
}

/// 创建入库单 (单事务: 主表 + 四类明细)
///
/// 返回新入库单ID。fexitbillid 上有唯一约束，重复收货在这里被数据库拦下。
pub async fn insert_entry_bill(
    pool: &PgPool,
    payload: &CorrectionPayload,
    franchise_id: i64,
    missing_reason: Option<&str>,
    extra_reason: Option<&str>,
) -> Result<i64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let entry_bill_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO t_erp_entry_bill (fexitbillid, ffranchiseid, fmissingreason, fextrareason, fcreatetime)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING fid
        "#,
    )
    .bind(payload.exit_bill_id)
    .bind(franchise_id)
    .bind(missing_reason)
    .bind(extra_reason)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    let records = payload.item_records();
    if !records.is_empty() {
        tracing::debug!("开始构建明细批量插入, {} 条记录", records.len());
        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO t_erp_entry_bill_item (fid, fvariantid, fqty, fkind) ",
        );
        query_builder.push_values(records.iter(), |mut b, record| {
            b.push_bind(entry_bill_id)
                .push_bind(record.fvariantid)
                .push_bind(record.fqty)
                .push_bind(record.fkind.as_str());
        });

        // 超时控制: 30秒
        let execute_result = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            query_builder.build().execute(&mut *tx),
        )
        .await;

        match execute_result {
            Ok(Ok(result)) => {
                tracing::debug!("明细插入完成, 影响 {} 行", result.rows_affected());
            }
            Ok(Err(e)) => {
                tracing::error!("明细插入失败: {:?}", e);
                return Err(e);
            }
            Err(_) => {
                tracing::error!("明细插入超时 (>30秒)!");
                return Err(sqlx::Error::PoolTimedOut);
            }
        }
    }

    tx.commit().await?;
    Ok(entry_bill_id)
}

/// 查询某出库单已落库的差异明细 (missing / extra / broken)
pub async fn list_entry_bill_discrepancies(
    pool: &PgPool,
    exit_bill_id: i64,
) -> Result<Vec<DiscrepancyRow>, sqlx::Error> {
    sqlx::query_as::<_, DiscrepancyRow>(
        r#"
        SELECT ei.fvariantid AS variant_id,
               COALESCE(fs.fvariantname, '') AS variant_name,
               ei.fqty AS qty,
               ei.fkind AS kind
        FROM t_erp_entry_bill_item ei
        INNER JOIN t_erp_entry_bill nb ON nb.fid = ei.fid
        LEFT JOIN t_erp_franchise_stock fs
            ON fs.fvariantid = ei.fvariantid AND fs.ffranchiseid = nb.ffranchiseid
        WHERE nb.fexitbillid = $1
          AND ei.fkind IN ('missing', 'extra', 'broken')
        ORDER BY ei.fentryid
        "#,
    )
    .bind(exit_bill_id)
    .fetch_all(pool)
    .await
}

/// 差异明细导出为 CSV 文本
pub fn discrepancies_to_csv(
    rows: &[DiscrepancyRow],
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    use csv::Writer;

    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(["kind", "variant_id", "variant_name", "qty"])?;
    for row in rows {
        writer.write_record(&[
            row.kind.clone(),
            row.variant_id.to_string(),
            row.variant_name.clone(),
            row.qty.to_string(),
        ])?;
    }
    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CorrectionItem, ItemKind};

    #[test]
    fn payload_expands_to_kind_tagged_records() {
        let payload = CorrectionPayload {
            exit_bill_id: 1,
            bill_items: vec![CorrectionItem { product_variant_id: 1, quantity: 5 }],
            missing_items: vec![CorrectionItem { product_variant_id: 2, quantity: 2 }],
            extra_items: vec![CorrectionItem { product_variant_id: 3, quantity: 1 }],
            broken_items: vec![],
        };
        let records = payload.item_records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].fkind, ItemKind::Bill);
        assert_eq!(records[1].fkind, ItemKind::Missing);
        assert_eq!(records[1].fqty, 2);
        assert_eq!(records[2].fkind, ItemKind::Extra);
    }

    #[test]
    fn csv_export_is_header_plus_rows() {
        let rows = vec![
            DiscrepancyRow {
                variant_id: 2,
                variant_name: "oolong 500ml".to_string(),
                qty: 2,
                kind: "missing".to_string(),
            },
            DiscrepancyRow {
                variant_id: 3,
                variant_name: "jasmine 500ml".to_string(),
                qty: 1,
                kind: "extra".to_string(),
            },
        ];
        let csv = discrepancies_to_csv(&rows).unwrap();
        let lines: Vec<&str> = csv.trim_end().lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "kind,variant_id,variant_name,qty");
        assert_eq!(lines[1], "missing,2,oolong 500ml,2");
        assert_eq!(lines[2], "extra,3,jasmine 500ml,1");
    }
}
