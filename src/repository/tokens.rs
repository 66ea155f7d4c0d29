//! Hashed token storage (verification, password reset, refresh)

use chrono::{DateTime, Utc};

use super::Repository;
use crate::{
    error::AppResult,
    models::token::{TokenKind, TokenRecord},
};

impl Repository {
    /// Store a token digest
    pub async fn tokens_insert(
        &self,
        kind: TokenKind,
        user_id: i32,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<TokenRecord> {
        let query = format!(
            "INSERT INTO {} (user_id, token_hash, expires_at) VALUES ($1, $2, $3) RETURNING *",
            kind.table()
        );
        let record = sqlx::query_as::<_, TokenRecord>(&query)
            .bind(user_id)
            .bind(token_hash)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    /// Find a token by digest, optionally scoped to a user
    pub async fn tokens_find(
        &self,
        kind: TokenKind,
        token_hash: &str,
        user_id: Option<i32>,
    ) -> AppResult<Option<TokenRecord>> {
        let record = match user_id {
            Some(user_id) => {
                let query = format!(
                    "SELECT * FROM {} WHERE token_hash = $1 AND user_id = $2 ORDER BY id DESC LIMIT 1",
                    kind.table()
                );
                sqlx::query_as::<_, TokenRecord>(&query)
                    .bind(token_hash)
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                let query = format!(
                    "SELECT * FROM {} WHERE token_hash = $1 ORDER BY id DESC LIMIT 1",
                    kind.table()
                );
                sqlx::query_as::<_, TokenRecord>(&query)
                    .bind(token_hash)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        Ok(record)
    }

    /// Delete one token row. Returns false when another request already consumed it.
    pub async fn tokens_consume(&self, kind: TokenKind, id: i32) -> AppResult<bool> {
        let query = format!("DELETE FROM {} WHERE id = $1", kind.table());
        let result = sqlx::query(&query).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete every row matching a digest
    pub async fn tokens_delete_by_hash(&self, kind: TokenKind, token_hash: &str) -> AppResult<u64> {
        let query = format!("DELETE FROM {} WHERE token_hash = $1", kind.table());
        let result = sqlx::query(&query).bind(token_hash).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Delete every token of this kind owned by a user
    pub async fn tokens_delete_for_user(&self, kind: TokenKind, user_id: i32) -> AppResult<u64> {
        let query = format!("DELETE FROM {} WHERE user_id = $1", kind.table());
        let result = sqlx::query(&query).bind(user_id).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
