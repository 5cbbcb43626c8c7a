//! Row types.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A cached invoice memo.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct MemoEntry {
    pub payment_hash: String,
    pub memo: String,
    pub created_at: String,
    pub updated_at: String,
}
