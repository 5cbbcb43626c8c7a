//! Memo cache rows keyed by payment hash.

use sqlx::SqlitePool;

use crate::models::MemoEntry;
use crate::Result;

/// Create or update the memo for a payment hash.
pub async fn upsert_memo(pool: &SqlitePool, payment_hash: &str, memo: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO memo_cache (payment_hash, memo)
        VALUES (?, ?)
        ON CONFLICT(payment_hash) DO UPDATE SET
            memo = excluded.memo,
            updated_at = datetime('now')
        "#,
    )
    .bind(payment_hash)
    .bind(memo)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the memo entry for a payment hash.
pub async fn get_memo(pool: &SqlitePool, payment_hash: &str) -> Result<Option<MemoEntry>> {
    let record = sqlx::query_as::<_, MemoEntry>(
        r#"
        SELECT payment_hash, memo, created_at, updated_at
        FROM memo_cache
        WHERE payment_hash = ?
        "#,
    )
    .bind(payment_hash)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Delete the memo for a payment hash. Returns whether a row was removed.
pub async fn delete_memo(pool: &SqlitePool, payment_hash: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM memo_cache
        WHERE payment_hash = ?
        "#,
    )
    .bind(payment_hash)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Count cached memos.
pub async fn count_memos(pool: &SqlitePool) -> Result<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memo_cache")
        .fetch_one(pool)
        .await?;

    Ok(count.0)
}
