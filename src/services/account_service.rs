//! Accounts and bearer tokens.
//!
//! Tokens are `bd_` plus two v4 UUIDs in base64url (32 bytes, 244 of them
//! random bits). They are handed out once; only their SHA-256 hex digest is
//! stored.

use crate::models::user::{User, UserRole};
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("a user with e-mail `{0}` already exists")]
    EmailTaken(String),
    #[error("invalid e-mail address `{0}`")]
    InvalidEmail(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct AccountService {
    db: SqlitePool,
}

impl AccountService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create_user(
        &self,
        email: &str,
        name: Option<String>,
        role: UserRole,
    ) -> Result<User, AccountError> {
        let email = email.trim().to_ascii_lowercase();
        if email.len() < 3 || !email.contains('@') {
            return Err(AccountError::InvalidEmail(email));
        }

        sqlx::query_as::<_, User>(
            "INSERT INTO users (id, email, name, role, created_at) VALUES (?, ?, ?, ?, ?)
             RETURNING id, email, name, role, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(name)
        .bind(role)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await
        .map_err(|err| {
            if crate::db::is_unique_violation(&err) {
                AccountError::EmailTaken(email.clone())
            } else {
                AccountError::Sqlx(err)
            }
        })
    }

    /// Mint a new token for `user_id`. The plaintext is only returned here.
    pub async fn issue_token(&self, user_id: Uuid) -> Result<String, AccountError> {
        let token = mint_token();
        sqlx::query("INSERT INTO api_tokens (id, user_id, token_hash, created_at) VALUES (?, ?, ?, ?)")
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(hash_token(&token))
            .bind(Utc::now())
            .execute(&self.db)
            .await?;
        Ok(token)
    }

    /// Resolve a bearer token to its user.
    pub async fn authenticate(&self, token: &str) -> Result<Option<User>, AccountError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT u.id, u.email, u.name, u.role, u.created_at
             FROM api_tokens t JOIN users u ON u.id = t.user_id
             WHERE t.token_hash = ?",
        )
        .bind(hash_token(token))
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }
}

fn mint_token() -> String {
    let mut raw = [0u8; 32];
    raw[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    raw[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    format!("bd_{}", general_purpose::URL_SAFE_NO_PAD.encode(raw))
}

fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn issued_token_authenticates_its_user() {
        let accounts = AccountService::new(db::memory().await.unwrap());
        let user = accounts
            .create_user("Owner@Example.com", None, UserRole::User)
            .await
            .unwrap();
        assert_eq!(user.email, "owner@example.com");

        let token = accounts.issue_token(user.id).await.unwrap();
        assert!(token.starts_with("bd_"));

        let found = accounts.authenticate(&token).await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(!found.is_admin());
        assert!(accounts.authenticate("bd_unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let accounts = AccountService::new(db::memory().await.unwrap());
        accounts
            .create_user("ops@example.com", None, UserRole::Admin)
            .await
            .unwrap();
        let err = accounts
            .create_user("ops@example.com", None, UserRole::User)
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::EmailTaken(_)));
    }

    #[test]
    fn minted_tokens_carry_two_v4_uuids() {
        let token = mint_token();
        let encoded = token.strip_prefix("bd_").unwrap();
        assert_eq!(encoded.len(), 43);
        let raw = general_purpose::URL_SAFE_NO_PAD.decode(encoded).unwrap();
        assert_eq!(raw.len(), 32);
        for half in raw.chunks(16) {
            let uuid = Uuid::from_slice(half).unwrap();
            assert_eq!(uuid.get_version_num(), 4);
        }

        let tokens: std::collections::HashSet<_> = (0..64).map(|_| mint_token()).collect();
        assert_eq!(tokens.len(), 64);
    }

    #[test]
    fn token_hash_is_hex_sha256() {
        let hash = hash_token("secret");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
    }
}
