//! Canonical recall store operations
//!
//! Writers run inside per-batch transactions owned by the orchestrator;
//! every function here that mutates takes a generic executor so it can bind
//! to either the pool or an open transaction.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, Sqlite, SqlitePool};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::dedup::blocking::blocking_key;
use crate::models::{RawRef, Recall};
use rhub_common::{Error, Result};

/// Insert or replace one canonical row
pub async fn save_recall<'e, E>(executor: E, recall: &Recall) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let model_numbers = serde_json::to_string(&recall.model_numbers)
        .map_err(|e| Error::Internal(format!("Failed to serialize model_numbers: {}", e)))?;
    let identifying_codes = serde_json::to_string(&recall.identifying_codes)
        .map_err(|e| Error::Internal(format!("Failed to serialize identifying_codes: {}", e)))?;
    let merged_from: Vec<String> = recall.merged_from.iter().map(|r| r.compact()).collect();
    let merged_from = serde_json::to_string(&merged_from)
        .map_err(|e| Error::Internal(format!("Failed to serialize merged_from: {}", e)))?;
    let block_key = blocking_key(
        &recall.brand,
        &recall.product_name,
        &recall.country,
        recall.recall_date,
    );

    sqlx::query(
        r#"
        INSERT INTO recalls (
            id, source_agency, source_record_id, product_name, brand,
            model_numbers, identifying_codes, category, hazard_type,
            hazard_description, country, recall_date, risk_score,
            match_confidence, merged_from, block_key, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            source_agency = excluded.source_agency,
            source_record_id = excluded.source_record_id,
            product_name = excluded.product_name,
            brand = excluded.brand,
            model_numbers = excluded.model_numbers,
            identifying_codes = excluded.identifying_codes,
            category = excluded.category,
            hazard_type = excluded.hazard_type,
            hazard_description = excluded.hazard_description,
            country = excluded.country,
            recall_date = excluded.recall_date,
            risk_score = excluded.risk_score,
            match_confidence = excluded.match_confidence,
            merged_from = excluded.merged_from,
            block_key = excluded.block_key,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(recall.id.to_string())
    .bind(&recall.source_agency)
    .bind(&recall.source_record_id)
    .bind(&recall.product_name)
    .bind(&recall.brand)
    .bind(model_numbers)
    .bind(identifying_codes)
    .bind(&recall.category)
    .bind(&recall.hazard_type)
    .bind(&recall.hazard_description)
    .bind(&recall.country)
    .bind(recall.recall_date.format("%Y-%m-%d").to_string())
    .bind(recall.risk_score as i64)
    .bind(recall.match_confidence)
    .bind(merged_from)
    .bind(block_key)
    .bind(recall.created_at.to_rfc3339())
    .bind(recall.updated_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

/// Delete a canonical row that was folded into another by a merge
pub async fn delete_recall<'e, E>(executor: E, id: Uuid) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM recalls WHERE id = ?")
        .bind(id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

/// Load one canonical row
pub async fn load_recall(pool: &SqlitePool, id: Uuid) -> Result<Option<Recall>> {
    let row = sqlx::query("SELECT * FROM recalls WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.map(|r| row_to_recall(&r)).transpose()
}

/// Load candidate rows for dedup blocking
pub async fn find_by_block_keys(pool: &SqlitePool, keys: &[String]) -> Result<Vec<Recall>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; keys.len()].join(", ");
    let sql = format!("SELECT * FROM recalls WHERE block_key IN ({})", placeholders);
    let mut query = sqlx::query(&sql);
    for key in keys {
        query = query.bind(key);
    }
    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_recall).collect()
}

/// Look up the canonical row answering for a raw record, with the stored
/// content hash; this is the dedup short-circuit path
pub async fn find_canonical_for_raw(
    pool: &SqlitePool,
    source_agency: &str,
    source_record_id: &str,
) -> Result<Option<(Uuid, String)>> {
    let row = sqlx::query(
        "SELECT recall_id, content_hash FROM raw_record_index WHERE source_agency = ? AND source_record_id = ?",
    )
    .bind(source_agency)
    .bind(source_record_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let id_str: String = row.get("recall_id");
            let id = Uuid::parse_str(&id_str)
                .map_err(|e| Error::Internal(format!("Failed to parse recall_id: {}", e)))?;
            Ok(Some((id, row.get("content_hash"))))
        }
        None => Ok(None),
    }
}

/// Insert or repoint one raw-record index entry
pub async fn upsert_raw_index<'e, E>(
    executor: E,
    raw_ref: &RawRef,
    recall_id: Uuid,
    content_hash: &str,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO raw_record_index (source_agency, source_record_id, recall_id, content_hash, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(source_agency, source_record_id) DO UPDATE SET
            recall_id = excluded.recall_id,
            content_hash = excluded.content_hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&raw_ref.agency)
    .bind(&raw_ref.record_id)
    .bind(recall_id.to_string())
    .bind(content_hash)
    .bind(Utc::now().to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

/// Repoint every raw index entry from an absorbed row to its survivor
pub async fn repoint_raw_index<'e, E>(executor: E, from: Uuid, to: Uuid) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE raw_record_index SET recall_id = ?, updated_at = ? WHERE recall_id = ?")
        .bind(to.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(from.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

/// Load the whole canonical corpus (index rebuild, full risk recalculation)
pub async fn load_all(pool: &SqlitePool) -> Result<Vec<Recall>> {
    let rows = sqlx::query("SELECT * FROM recalls").fetch_all(pool).await?;
    rows.iter().map(row_to_recall).collect()
}

/// Load rows updated since a timestamp (scoped risk recalculation)
pub async fn load_changed_since(
    pool: &SqlitePool,
    since: DateTime<Utc>,
) -> Result<Vec<Recall>> {
    let rows = sqlx::query("SELECT * FROM recalls WHERE updated_at >= ?")
        .bind(since.to_rfc3339())
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_recall).collect()
}

/// Update only the risk score of a row (risk recalculation cycle)
pub async fn update_risk_score<'e, E>(executor: E, id: Uuid, risk_score: u8) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE recalls SET risk_score = ?, updated_at = ? WHERE id = ?")
        .bind(risk_score as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

/// Count canonical rows
pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recalls")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

fn row_to_recall(row: &sqlx::sqlite::SqliteRow) -> Result<Recall> {
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| Error::Internal(format!("Failed to parse recall id: {}", e)))?;

    let model_numbers: String = row.get("model_numbers");
    let model_numbers: BTreeSet<String> = serde_json::from_str(&model_numbers)
        .map_err(|e| Error::Internal(format!("Failed to deserialize model_numbers: {}", e)))?;

    let identifying_codes: String = row.get("identifying_codes");
    let identifying_codes: BTreeSet<String> = serde_json::from_str(&identifying_codes)
        .map_err(|e| Error::Internal(format!("Failed to deserialize identifying_codes: {}", e)))?;

    let merged_from: String = row.get("merged_from");
    let merged_from: Vec<String> = serde_json::from_str(&merged_from)
        .map_err(|e| Error::Internal(format!("Failed to deserialize merged_from: {}", e)))?;
    let merged_from: BTreeSet<RawRef> = merged_from
        .iter()
        .filter_map(|s| RawRef::parse(s))
        .collect();

    let recall_date: String = row.get("recall_date");
    let recall_date = NaiveDate::parse_from_str(&recall_date, "%Y-%m-%d")
        .map_err(|e| Error::Internal(format!("Failed to parse recall_date: {}", e)))?;

    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&Utc);

    let updated_at: String = row.get("updated_at");
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| Error::Internal(format!("Failed to parse updated_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(Recall {
        id,
        source_agency: row.get("source_agency"),
        source_record_id: row.get("source_record_id"),
        product_name: row.get("product_name"),
        brand: row.get("brand"),
        model_numbers,
        identifying_codes,
        category: row.get("category"),
        hazard_type: row.get("hazard_type"),
        hazard_description: row.get("hazard_description"),
        country: row.get("country"),
        recall_date,
        risk_score: row.get::<i64, _>("risk_score").clamp(0, 100) as u8,
        match_confidence: row.get("match_confidence"),
        merged_from,
        created_at,
        updated_at,
    })
}
