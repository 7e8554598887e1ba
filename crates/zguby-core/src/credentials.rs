//! Bearer token acquisition and renewal.
//!
//! [`CredentialManager`] is the single authority for the portal token. Readers
//! share the cached token; logins are serialized behind one lock, so
//! concurrent callers that find the cache empty or stale wait for a single
//! in-flight login and then reuse its result.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::traits::PortalApi;
use crate::AppError;

/// Email/password pair used for `POST /auth/login`.
#[derive(Clone)]
pub struct LoginCredentials {
    pub email: String,
    password: String,
}

impl LoginCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A bearer token with an optional expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// True while the token is not within `margin` of its expiry.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: std::time::Duration) -> bool {
        match self.expires_at {
            None => true,
            Some(at) => {
                let margin = chrono::Duration::from_std(margin).unwrap_or_default();
                now + margin < at
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Caches the portal token and renews it under a single authority.
pub struct CredentialManager<P: PortalApi> {
    portal: P,
    credentials: LoginCredentials,
    config: AuthConfig,
    cached: RwLock<Option<Credential>>,
    refresh_lock: Mutex<()>,
}

impl<P: PortalApi> CredentialManager<P> {
    pub fn new(portal: P, credentials: LoginCredentials, config: AuthConfig) -> Self {
        Self {
            portal,
            credentials,
            config,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns the cached token, logging in first when there is none or it
    /// is about to expire.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AuthError` once `max_login_attempts` consecutive
    /// logins have failed.
    pub async fn get_token(&self) -> Result<Credential, AppError> {
        if let Some(credential) = self.fresh_cached().await {
            return Ok(credential);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have logged in while we waited for the lock.
        if let Some(credential) = self.fresh_cached().await {
            return Ok(credential);
        }
        self.login_locked().await
    }

    /// Replaces a token the portal rejected.
    ///
    /// Concurrent callers holding the same rejected token coalesce into one
    /// login: whoever takes the lock second finds a different cached token
    /// and returns it without calling the portal.
    pub async fn refresh(&self, rejected: &Credential) -> Result<Credential, AppError> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.fresh_cached().await {
            if current.token() != rejected.token() {
                debug!("token already refreshed by another caller");
                return Ok(current);
            }
        }

        *self.cached.write().await = None;
        self.login_locked().await
    }

    async fn fresh_cached(&self) -> Option<Credential> {
        let cached = self.cached.read().await;
        cached
            .as_ref()
            .filter(|c| c.is_fresh(Utc::now(), self.config.expiry_margin))
            .cloned()
    }

    /// Must be called with `refresh_lock` held.
    async fn login_locked(&self) -> Result<Credential, AppError> {
        let max_attempts = self.config.max_login_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.portal.login(&self.credentials).await {
                Ok(credential) => {
                    let credential = self.apply_ttl(credential);
                    info!(
                        email = %self.credentials.email,
                        expires_at = ?credential.expires_at(),
                        "Logged in to portal"
                    );
                    *self.cached.write().await = Some(credential.clone());
                    return Ok(credential);
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Portal login failed");
                    last_error = Some(e);
                    if attempt < max_attempts {
                        let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(AppError::AuthError(format!(
            "login failed {} time(s) in a row: {}",
            max_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn apply_ttl(&self, credential: Credential) -> Credential {
        match (credential.expires_at(), self.config.token_ttl) {
            (None, Some(ttl)) => match chrono::Duration::from_std(ttl) {
                Ok(ttl) => credential.with_expiry(Utc::now() + ttl),
                Err(_) => credential,
            },
            _ => credential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::models::{
        DatasetRequest, DatasetSubmissionRequest, ResourceRequest, SubmittedDataset,
        SubmittedResource,
    };

    #[derive(Clone)]
    struct CountingPortal {
        logins: Arc<AtomicU32>,
        failures_before_success: u32,
        expires_in: Option<chrono::Duration>,
    }

    impl CountingPortal {
        fn new(failures_before_success: u32) -> Self {
            Self {
                logins: Arc::new(AtomicU32::new(0)),
                failures_before_success,
                expires_in: None,
            }
        }
    }

    impl PortalApi for CountingPortal {
        async fn login(&self, _credentials: &LoginCredentials) -> Result<Credential, AppError> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(5)).await;
            if n <= self.failures_before_success {
                return Err(AppError::from_status(503, "unavailable"));
            }
            let credential = Credential::new(format!("token-{n}"));
            Ok(match self.expires_in {
                Some(d) => credential.with_expiry(Utc::now() + d),
                None => credential,
            })
        }

        async fn create_dataset(
            &self,
            _token: &str,
            _request: &DatasetRequest,
        ) -> Result<String, AppError> {
            unreachable!("not used by credential tests")
        }

        async fn submit_resource(
            &self,
            _token: &str,
            _dataset_id: &str,
            _idempotency_key: &str,
            _request: &ResourceRequest,
        ) -> Result<SubmittedResource, AppError> {
            unreachable!("not used by credential tests")
        }

        async fn submit_dataset(
            &self,
            _token: &str,
            _idempotency_key: &str,
            _request: &DatasetSubmissionRequest,
        ) -> Result<SubmittedDataset, AppError> {
            unreachable!("not used by credential tests")
        }
    }

    fn fast_config() -> AuthConfig {
        AuthConfig {
            retry_base_delay: Duration::ZERO,
            ..AuthConfig::default()
        }
    }

    fn manager(portal: CountingPortal) -> Arc<CredentialManager<CountingPortal>> {
        Arc::new(CredentialManager::new(
            portal,
            LoginCredentials::new("admin@mcod.local", "secret"),
            fast_config(),
        ))
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let portal = CountingPortal::new(0);
        let logins = portal.logins.clone();
        let manager = manager(portal);

        let first = manager.get_token().await.unwrap();
        let second = manager.get_token().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_login() {
        let portal = CountingPortal::new(0);
        let logins = portal.logins.clone();
        let manager = manager(portal);

        let tokens = futures::future::join_all((0..16).map(|_| manager.get_token())).await;
        assert!(tokens.iter().all(|t| t.as_ref().unwrap().token() == "token-1"));
        assert_eq!(logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_coalesce() {
        let portal = CountingPortal::new(0);
        let logins = portal.logins.clone();
        let manager = manager(portal);

        let stale = manager.get_token().await.unwrap();
        let refreshed =
            futures::future::join_all((0..8).map(|_| manager.refresh(&stale))).await;

        assert!(refreshed.iter().all(|t| t.as_ref().unwrap().token() == "token-2"));
        assert_eq!(logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_login_retries_until_success() {
        let portal = CountingPortal::new(2);
        let logins = portal.logins.clone();
        let manager = manager(portal);

        let token = manager.get_token().await.unwrap();
        assert_eq!(token.token(), "token-3");
        assert_eq!(logins.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_login_gives_up_with_auth_error() {
        let portal = CountingPortal::new(u32::MAX);
        let logins = portal.logins.clone();
        let manager = manager(portal);

        let err = manager.get_token().await.unwrap_err();
        assert!(matches!(err, AppError::AuthError(_)));
        assert!(err.is_fatal());
        assert_eq!(logins.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_expiring_token_is_renewed() {
        let mut portal = CountingPortal::new(0);
        // Inside the 30s safety margin, so never considered fresh.
        portal.expires_in = Some(chrono::Duration::seconds(10));
        let logins = portal.logins.clone();
        let manager = manager(portal);

        manager.get_token().await.unwrap();
        manager.get_token().await.unwrap();
        assert_eq!(logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_with_current_token_logs_in_again() {
        let portal = CountingPortal::new(0);
        let logins = portal.logins.clone();
        let manager = manager(portal);

        let first = manager.get_token().await.unwrap();
        let refreshed = manager.refresh(&first).await.unwrap();
        assert_eq!(refreshed.token(), "token-2");
        assert_eq!(manager.get_token().await.unwrap(), refreshed);
        assert_eq!(logins.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = LoginCredentials::new("a@b.pl", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
        let credential = Credential::new("jwt-abc");
        assert!(!format!("{credential:?}").contains("jwt-abc"));
    }

    #[test]
    fn test_freshness_margin() {
        let now = Utc::now();
        let credential = Credential::new("t").with_expiry(now + chrono::Duration::seconds(60));
        assert!(credential.is_fresh(now, Duration::from_secs(30)));
        assert!(!credential.is_fresh(now, Duration::from_secs(90)));
        assert!(Credential::new("t").is_fresh(now, Duration::from_secs(90)));
    }
}
