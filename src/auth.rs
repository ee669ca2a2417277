//! API key issuance and validation
//!
//! Keys are random tokens shown to the caller exactly once. Only a bcrypt
//! hash and a short display prefix are stored; the prefix narrows a lookup
//! to a handful of candidates before the slow hash comparison runs.

use crate::config::AuthConfig;
use crate::error::{AppError, Result};
use crate::models::{ApiKey, NewApiKey};
use crate::store::Store;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;

/// Random bytes behind every issued key
const KEY_ENTROPY_BYTES: usize = 32;

/// What a request presented, after checking it against the store
#[derive(Debug, Clone, PartialEq)]
pub enum Credential {
    /// No key was presented
    Missing,
    /// A key was presented but is unknown, revoked or expired
    Invalid,
    Valid(ApiKey),
}

impl Credential {
    /// Anonymous access allowed, but a presented key must be valid
    pub fn optional(self) -> Result<Option<ApiKey>> {
        match self {
            Credential::Missing => Ok(None),
            Credential::Invalid => Err(AppError::Auth("Invalid API key".to_string())),
            Credential::Valid(key) => Ok(Some(key)),
        }
    }

    pub fn required(self) -> Result<ApiKey> {
        match self {
            Credential::Missing => Err(AppError::Auth("API key required".to_string())),
            Credential::Invalid => Err(AppError::Auth("Invalid API key".to_string())),
            Credential::Valid(key) => Ok(key),
        }
    }
}

pub fn hash_api_key(api_key: &str, cost: u32) -> Result<String> {
    Ok(bcrypt::hash(api_key, cost)?)
}

pub fn verify_api_key(api_key: &str, hash: &str) -> Result<bool> {
    Ok(bcrypt::verify(api_key, hash)?)
}

pub struct KeyAuthenticator {
    store: Store,
    config: AuthConfig,
}

impl KeyAuthenticator {
    pub fn new(store: Store, config: AuthConfig) -> Self {
        Self { store, config }
    }

    pub fn header_name(&self) -> &str {
        &self.config.header_name
    }

    /// Produce a fresh token: the configured prefix followed by URL-safe base64
    pub fn generate_token(&self) -> String {
        let mut bytes = [0u8; KEY_ENTROPY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        format!(
            "{}{}",
            self.config.key_prefix,
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
        )
    }

    fn display_prefix<'a>(&self, token: &'a str) -> Option<&'a str> {
        if !token.starts_with(&self.config.key_prefix) {
            return None;
        }
        token.get(..self.config.display_prefix_len())
    }

    /// Issue a key, returning the stored record and the plaintext token
    pub async fn generate(
        &self,
        name: &str,
        description: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(ApiKey, String)> {
        let name = name.trim();
        if name.is_empty() || name.len() > 255 {
            return Err(AppError::Validation(
                "name must be between 1 and 255 characters".to_string(),
            ));
        }

        let token = self.generate_token();
        let key_prefix = self
            .display_prefix(&token)
            .ok_or_else(|| AppError::Internal("generated key is shorter than its prefix".into()))?
            .to_string();

        let cost = self.config.bcrypt_cost;
        let plaintext = token.clone();
        let key_hash = tokio::task::spawn_blocking(move || hash_api_key(&plaintext, cost)).await??;

        let stored = self
            .store
            .insert_api_key(&NewApiKey {
                name: name.to_string(),
                description: description.map(str::to_string),
                key_hash,
                key_prefix,
                created_at: Utc::now(),
                expires_at,
            })
            .await?;

        tracing::info!("Issued API key {} ({})", stored.id, stored.key_prefix);
        Ok((stored, token))
    }

    /// Check a presented token, counting a use when it is valid
    ///
    /// Returns `None` for unknown, revoked and expired keys alike.
    pub async fn validate(&self, presented: &str) -> Result<Option<ApiKey>> {
        let Some(prefix) = self.display_prefix(presented) else {
            return Ok(None);
        };

        let candidates = self.store.active_api_keys_with_prefix(prefix).await?;
        for candidate in candidates {
            let token = presented.to_string();
            let hash = candidate.key_hash.clone();
            let matches = tokio::task::spawn_blocking(move || verify_api_key(&token, &hash))
                .await?
                .unwrap_or_else(|e| {
                    tracing::warn!("Unreadable hash on API key {}: {}", candidate.id, e);
                    false
                });
            if !matches {
                continue;
            }

            let now = Utc::now();
            if candidate.is_expired(now) {
                tracing::debug!("API key {} presented after expiry", candidate.id);
                return Ok(None);
            }

            return self.store.record_api_key_use(candidate.id, now).await;
        }

        Ok(None)
    }

    pub async fn authenticate(&self, presented: Option<&str>) -> Result<Credential> {
        let presented = presented.map(str::trim).filter(|k| !k.is_empty());
        let Some(presented) = presented else {
            return Ok(Credential::Missing);
        };

        let credential = match self.validate(presented).await? {
            Some(key) => Credential::Valid(key),
            None => Credential::Invalid,
        };
        crate::metrics::record_key_validation(matches!(credential, Credential::Valid(_)));
        Ok(credential)
    }

    pub async fn list(&self, include_inactive: bool) -> Result<Vec<ApiKey>> {
        self.store.list_api_keys(include_inactive).await
    }

    pub async fn get(&self, id: i64) -> Result<ApiKey> {
        self.store
            .get_api_key(id)
            .await?
            .ok_or_else(|| AppError::NotFound("API key".to_string()))
    }

    pub async fn revoke(&self, id: i64) -> Result<ApiKey> {
        let key = self
            .store
            .set_api_key_active(id, false)
            .await?
            .ok_or_else(|| AppError::NotFound("API key".to_string()))?;
        tracing::info!("Revoked API key {}", id);
        Ok(key)
    }

    /// Mark a revoked key active again; expiry is left untouched
    pub async fn reactivate(&self, id: i64) -> Result<ApiKey> {
        let key = self
            .store
            .set_api_key_active(id, true)
            .await?
            .ok_or_else(|| AppError::NotFound("API key".to_string()))?;
        tracing::info!("Reactivated API key {}", id);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;
    use chrono::Duration;
    use std::sync::Arc;

    async fn authenticator() -> KeyAuthenticator {
        let config = AuthConfig {
            bcrypt_cost: 4,
            ..Default::default()
        };
        KeyAuthenticator::new(test_store().await, config)
    }

    #[test]
    fn test_hash_is_one_way_and_salted() {
        let key = "sk_live_example";
        let hash1 = hash_api_key(key, 4).unwrap();
        let hash2 = hash_api_key(key, 4).unwrap();

        assert_ne!(hash1, key);
        assert!(!hash1.contains(key));
        assert_ne!(hash1, hash2);
        assert!(verify_api_key(key, &hash1).unwrap());
        assert!(!verify_api_key("sk_live_other", &hash1).unwrap());
    }

    #[tokio::test]
    async fn test_generated_token_shape() {
        let auth = authenticator().await;
        let token = auth.generate_token();

        assert!(token.starts_with("sk_live_"));
        // 32 bytes of URL-safe base64 without padding
        assert_eq!(token.len(), "sk_live_".len() + 43);
        assert!(token["sk_live_".len()..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, auth.generate_token());
    }

    #[tokio::test]
    async fn test_generate_stores_hash_not_plaintext() {
        let auth = authenticator().await;
        let (key, plaintext) = auth.generate("ci", Some("pipeline"), None).await.unwrap();

        assert_eq!(key.key_prefix, &plaintext[..16]);
        assert_ne!(key.key_hash, plaintext);
        assert!(verify_api_key(&plaintext, &key.key_hash).unwrap());
        assert!(key.is_active);
        assert_eq!(key.description.as_deref(), Some("pipeline"));
    }

    #[tokio::test]
    async fn test_generate_rejects_blank_name() {
        let auth = authenticator().await;
        assert!(matches!(
            auth.generate("   ", None, None).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_correct_and_wrong_keys() {
        let auth = authenticator().await;
        let (key, plaintext) = auth.generate("ci", None, None).await.unwrap();

        let validated = auth.validate(&plaintext).await.unwrap().unwrap();
        assert_eq!(validated.id, key.id);
        assert_eq!(validated.request_count, 1);
        assert!(validated.last_used_at.is_some());

        // Same display prefix, different secret
        let mut tampered = plaintext.clone();
        tampered.pop();
        tampered.push(if plaintext.ends_with('A') { 'B' } else { 'A' });
        assert!(auth.validate(&tampered).await.unwrap().is_none());

        assert!(auth.validate("sk_live_short").await.unwrap().is_none());
        assert!(auth.validate("not-a-key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_and_reactivate() {
        let auth = authenticator().await;
        let (key, plaintext) = auth.generate("ci", None, None).await.unwrap();

        let revoked = auth.revoke(key.id).await.unwrap();
        assert!(!revoked.is_active);
        assert!(auth.validate(&plaintext).await.unwrap().is_none());

        auth.reactivate(key.id).await.unwrap();
        assert!(auth.validate(&plaintext).await.unwrap().is_some());

        assert!(matches!(auth.revoke(9999).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_expired_key_is_invalid() {
        let auth = authenticator().await;
        let (key, plaintext) = auth
            .generate("temp", None, Some(Utc::now() - Duration::seconds(1)))
            .await
            .unwrap();

        assert!(auth.validate(&plaintext).await.unwrap().is_none());
        assert_eq!(auth.get(key.id).await.unwrap().request_count, 0);

        // Reactivating does not extend an expired key
        auth.reactivate(key.id).await.unwrap();
        assert!(auth.validate(&plaintext).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_validations_count_every_use() {
        let auth = Arc::new(authenticator().await);
        let (key, plaintext) = auth.generate("load", None, None).await.unwrap();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let auth = Arc::clone(&auth);
                let plaintext = plaintext.clone();
                tokio::spawn(async move { auth.validate(&plaintext).await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().unwrap().is_some());
        }

        assert_eq!(auth.get(key.id).await.unwrap().request_count, 10);
    }

    #[tokio::test]
    async fn test_credential_policies() {
        let auth = authenticator().await;
        let (_, plaintext) = auth.generate("ci", None, None).await.unwrap();

        assert_eq!(auth.authenticate(None).await.unwrap(), Credential::Missing);
        assert_eq!(auth.authenticate(Some("  ")).await.unwrap(), Credential::Missing);
        assert_eq!(
            auth.authenticate(Some("sk_live_bogus_bogus")).await.unwrap(),
            Credential::Invalid
        );

        assert!(Credential::Missing.optional().unwrap().is_none());
        assert!(Credential::Missing.required().is_err());
        assert!(Credential::Invalid.optional().is_err());

        let valid = auth.authenticate(Some(&plaintext)).await.unwrap();
        assert!(valid.clone().optional().unwrap().is_some());
        assert!(valid.required().is_ok());
    }

    #[tokio::test]
    async fn test_listing_never_exposes_plaintext() {
        let auth = authenticator().await;
        let (_, plaintext) = auth.generate("ci", None, None).await.unwrap();

        let listed = serde_json::to_string(&auth.list(true).await.unwrap()).unwrap();
        assert!(!listed.contains(&plaintext));
        assert!(!listed.contains("key_hash"));
    }
}
