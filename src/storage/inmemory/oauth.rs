//! In-memory OAuth storage implementation
//!
//! This module provides in-memory implementations for the storage traits.
//! Every compare-and-swap runs under a single lock, which gives the same
//! at-most-once redemption guarantee as the SQL backends.

use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

pub type Result<T> = std::result::Result<T, StorageError>;

/// In-memory implementation for OAuth storage
#[derive(Default)]
pub struct MemoryOAuthStorage {
    applications: Mutex<HashMap<String, Application>>, // client_id -> application
    authorizations: Mutex<HashMap<String, Authorization>>, // id -> authorization
    tokens: Mutex<HashMap<String, Token>>,             // reference_id -> token
    signing_keys: Mutex<Vec<SigningKey>>,
    users: Mutex<HashMap<String, User>>,
}

fn lock_error<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::SerializationFailed(format!("Lock error: {}", e))
}

impl MemoryOAuthStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user. Users are owned by an external service, so this only
    /// exists for development and tests.
    pub fn store_user(&self, user: User) -> Result<()> {
        let mut users = self.users.lock().map_err(lock_error)?;
        users.insert(user.id.clone(), user);
        Ok(())
    }

    fn revoke_matching<F>(&self, predicate: F) -> Result<usize>
    where
        F: Fn(&Token) -> bool,
    {
        let mut tokens = self.tokens.lock().map_err(lock_error)?;
        let mut revoked = 0;
        for token in tokens.values_mut() {
            if token.status() == TokenStatus::Valid && predicate(token) && token.revoke().is_ok() {
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[async_trait]
impl ApplicationStore for MemoryOAuthStorage {
    async fn store_application(&self, application: &Application) -> Result<()> {
        let mut applications = self.applications.lock().map_err(lock_error)?;
        if applications.contains_key(&application.client_id) {
            return Err(StorageError::Duplicate(format!(
                "client_id {}",
                application.client_id
            )));
        }
        applications.insert(application.client_id.clone(), application.clone());
        Ok(())
    }

    async fn get_application_by_client_id(&self, client_id: &str) -> Result<Option<Application>> {
        let applications = self.applications.lock().map_err(lock_error)?;
        Ok(applications.get(client_id).cloned())
    }

    async fn list_active_applications(&self) -> Result<Vec<Application>> {
        let applications = self.applications.lock().map_err(lock_error)?;
        Ok(applications
            .values()
            .filter(|application| application.is_active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuthorizationStore for MemoryOAuthStorage {
    async fn store_authorization(&self, authorization: &Authorization) -> Result<()> {
        let mut authorizations = self.authorizations.lock().map_err(lock_error)?;
        authorizations.insert(authorization.id.clone(), authorization.clone());
        Ok(())
    }

    async fn get_authorization(&self, id: &str) -> Result<Option<Authorization>> {
        let authorizations = self.authorizations.lock().map_err(lock_error)?;
        Ok(authorizations.get(id).cloned())
    }

    async fn find_valid_authorization(
        &self,
        application_id: &str,
        user_id: &str,
        scopes: &str,
    ) -> Result<Option<Authorization>> {
        let scopes = normalize_scope(scopes);
        let authorizations = self.authorizations.lock().map_err(lock_error)?;
        Ok(authorizations
            .values()
            .filter(|authorization| {
                authorization.application_id == application_id
                    && authorization.user_id == user_id
                    && authorization.status == AuthorizationStatus::Valid
                    && normalize_scope(&authorization.scopes) == scopes
            })
            .max_by_key(|authorization| authorization.creation_date)
            .cloned())
    }

    async fn revoke_authorization(&self, id: &str) -> Result<usize> {
        {
            let mut authorizations = self.authorizations.lock().map_err(lock_error)?;
            match authorizations.get_mut(id) {
                Some(authorization) => authorization.status = AuthorizationStatus::Revoked,
                None => return Err(StorageError::NotFound(format!("authorization {}", id))),
            }
        }
        self.revoke_matching(|token| token.authorization_id.as_deref() == Some(id))
    }
}

#[async_trait]
impl TokenStore for MemoryOAuthStorage {
    async fn store_token(&self, token: &Token) -> Result<()> {
        let mut tokens = self.tokens.lock().map_err(lock_error)?;
        if tokens.contains_key(&token.reference_id) {
            return Err(StorageError::Duplicate(format!(
                "token reference {}",
                token.id
            )));
        }
        tokens.insert(token.reference_id.clone(), token.clone());
        Ok(())
    }

    async fn get_token_by_reference(&self, reference_id: &str) -> Result<Option<Token>> {
        let tokens = self.tokens.lock().map_err(lock_error)?;
        Ok(tokens.get(reference_id).cloned())
    }

    async fn redeem_token(&self, reference_id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.redeem_and_store(reference_id, now, &[]).await
    }

    async fn redeem_and_store(
        &self,
        reference_id: &str,
        now: DateTime<Utc>,
        issued: &[Token],
    ) -> Result<bool> {
        let mut tokens = self.tokens.lock().map_err(lock_error)?;

        if let Some(duplicate) = issued
            .iter()
            .find(|token| tokens.contains_key(&token.reference_id))
        {
            return Err(StorageError::Duplicate(format!(
                "token reference {}",
                duplicate.id
            )));
        }

        let redeemed = match tokens.get_mut(reference_id) {
            Some(token) => token.redeem(now).is_ok(),
            None => false,
        };
        if !redeemed {
            return Ok(false);
        }

        for token in issued {
            tokens.insert(token.reference_id.clone(), token.clone());
        }
        Ok(true)
    }

    async fn revoke_token(&self, reference_id: &str) -> Result<bool> {
        let mut tokens = self.tokens.lock().map_err(lock_error)?;
        Ok(match tokens.get_mut(reference_id) {
            Some(token) => token.revoke().is_ok(),
            None => false,
        })
    }

    async fn revoke_tokens_by_authorization(&self, authorization_id: &str) -> Result<usize> {
        self.revoke_matching(|token| token.authorization_id.as_deref() == Some(authorization_id))
    }

    async fn revoke_tokens_by_subject(&self, user_id: &str) -> Result<usize> {
        self.revoke_matching(|token| token.user_id == user_id)
    }
}

#[async_trait]
impl SigningKeyStore for MemoryOAuthStorage {
    async fn get_active_signing_key(&self) -> Result<Option<SigningKey>> {
        let keys = self.signing_keys.lock().map_err(lock_error)?;
        Ok(keys.iter().find(|key| key.is_active).cloned())
    }

    async fn list_signing_keys(&self) -> Result<Vec<SigningKey>> {
        let keys = self.signing_keys.lock().map_err(lock_error)?;
        let mut keys = keys.clone();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn activate_signing_key(&self, key: &SigningKey) -> Result<Option<String>> {
        let mut keys = self.signing_keys.lock().map_err(lock_error)?;
        if keys.iter().any(|existing| existing.key_id == key.key_id) {
            return Err(StorageError::Duplicate(format!("key id {}", key.key_id)));
        }

        let mut demoted = None;
        for existing in keys.iter_mut().filter(|existing| existing.is_active) {
            existing.is_active = false;
            demoted = Some(existing.key_id.clone());
        }

        let mut key = key.clone();
        key.is_active = true;
        keys.push(key);
        Ok(demoted)
    }

    async fn set_signing_key_expiration(
        &self,
        key_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut keys = self.signing_keys.lock().map_err(lock_error)?;
        match keys.iter_mut().find(|key| key.key_id == key_id) {
            Some(key) => {
                key.expires_at = expires_at;
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("signing key {}", key_id))),
        }
    }
}

#[async_trait]
impl UserStore for MemoryOAuthStorage {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let users = self.users.lock().map_err(lock_error)?;
        Ok(users.get(user_id).cloned())
    }
}

impl OAuthStorage for MemoryOAuthStorage {}
