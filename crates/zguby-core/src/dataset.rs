//! Resolution of the dataset that receives published resources.

use tokio::sync::OnceCell;
use tracing::info;

use crate::config::DatasetTarget;
use crate::credentials::CredentialManager;
use crate::traits::PortalApi;
use crate::AppError;

/// Resolves the target dataset once per process.
///
/// A static id is used unchanged. With auto-create, the first caller issues
/// the creation request and every other caller, concurrent or later, gets
/// the same id.
pub struct DatasetResolver<P: PortalApi> {
    portal: P,
    target: DatasetTarget,
    resolved: OnceCell<String>,
}

impl<P: PortalApi> DatasetResolver<P> {
    pub fn new(portal: P, target: DatasetTarget) -> Self {
        Self {
            portal,
            target,
            resolved: OnceCell::new(),
        }
    }

    /// The resolved id, if [`resolve`](Self::resolve) has succeeded.
    pub fn dataset_id(&self) -> Option<&str> {
        self.resolved.get().map(String::as_str)
    }

    /// Returns the dataset id, creating the dataset on first use when
    /// auto-create is configured.
    ///
    /// # Errors
    ///
    /// - `AppError::ConfigError` when neither a static id nor auto-create is set.
    /// - `AppError::AuthError` when no token can be obtained.
    /// - `AppError::DatasetUnavailable` when the creation call fails.
    pub async fn resolve(&self, credentials: &CredentialManager<P>) -> Result<String, AppError> {
        let id = self
            .resolved
            .get_or_try_init(|| self.resolve_uncached(credentials))
            .await?;
        Ok(id.clone())
    }

    async fn resolve_uncached(&self, credentials: &CredentialManager<P>) -> Result<String, AppError> {
        match &self.target {
            DatasetTarget::Static(id) => {
                info!(dataset_id = %id, "Using configured dataset");
                Ok(id.clone())
            }
            DatasetTarget::AutoCreate(spec) => {
                let request = spec.to_request();
                let token = credentials.get_token().await?;

                let created = match self.portal.create_dataset(token.token(), &request).await {
                    Err(AppError::Unauthorized) => {
                        let token = credentials.refresh(&token).await?;
                        self.portal.create_dataset(token.token(), &request).await
                    }
                    other => other,
                };

                let id = created.map_err(|e| match e {
                    AppError::AuthError(_) => e,
                    other => AppError::DatasetUnavailable(other.to_string()),
                })?;
                info!(dataset_id = %id, title = %spec.title, "Created dataset on portal");
                Ok(id)
            }
            DatasetTarget::Unconfigured => Err(AppError::ConfigError(
                "no dataset id configured and dataset auto-create is disabled".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::{AuthConfig, DatasetSpec};
    use crate::credentials::{Credential, LoginCredentials};
    use crate::models::{
        DatasetRequest, DatasetSubmissionRequest, ResourceRequest, SubmittedDataset,
        SubmittedResource,
    };

    #[derive(Clone, Default)]
    struct DatasetPortal {
        creations: Arc<AtomicU32>,
        fail_creation: bool,
        reject_first_token: bool,
        logins: Arc<AtomicU32>,
    }

    impl PortalApi for DatasetPortal {
        async fn login(&self, _credentials: &LoginCredentials) -> Result<Credential, AppError> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Credential::new(format!("token-{n}")))
        }

        async fn create_dataset(
            &self,
            token: &str,
            request: &DatasetRequest,
        ) -> Result<String, AppError> {
            if self.reject_first_token && token == "token-1" {
                return Err(AppError::Unauthorized);
            }
            let n = self.creations.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.fail_creation {
                return Err(AppError::from_status(500, "boom"));
            }
            assert_eq!(request.data.kind, "dataset");
            Ok(format!("ds-{n}"))
        }

        async fn submit_resource(
            &self,
            _token: &str,
            _dataset_id: &str,
            _idempotency_key: &str,
            _request: &ResourceRequest,
        ) -> Result<SubmittedResource, AppError> {
            unreachable!("not used by dataset tests")
        }

        async fn submit_dataset(
            &self,
            _token: &str,
            _idempotency_key: &str,
            _request: &DatasetSubmissionRequest,
        ) -> Result<SubmittedDataset, AppError> {
            unreachable!("not used by dataset tests")
        }
    }

    fn credentials(portal: &DatasetPortal) -> CredentialManager<DatasetPortal> {
        CredentialManager::new(
            portal.clone(),
            LoginCredentials::new("a@b.pl", "pw"),
            AuthConfig {
                retry_base_delay: Duration::ZERO,
                ..AuthConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_static_id_is_used_unchanged() {
        let portal = DatasetPortal::default();
        let resolver = DatasetResolver::new(portal.clone(), DatasetTarget::Static("ds-static".into()));
        let creds = credentials(&portal);

        assert_eq!(resolver.resolve(&creds).await.unwrap(), "ds-static");
        assert_eq!(portal.creations.load(Ordering::SeqCst), 0);
        assert_eq!(portal.logins.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.dataset_id(), Some("ds-static"));
    }

    #[tokio::test]
    async fn test_auto_create_runs_once() {
        let portal = DatasetPortal::default();
        let resolver = Arc::new(DatasetResolver::new(
            portal.clone(),
            DatasetTarget::AutoCreate(DatasetSpec::default()),
        ));
        let creds = credentials(&portal);

        let ids = futures::future::join_all((0..8).map(|_| resolver.resolve(&creds))).await;
        assert!(ids.iter().all(|id| id.as_ref().unwrap() == "ds-1"));
        assert_eq!(resolver.resolve(&creds).await.unwrap(), "ds-1");
        assert_eq!(portal.creations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_creation_failure_is_fatal() {
        let portal = DatasetPortal {
            fail_creation: true,
            ..DatasetPortal::default()
        };
        let resolver = DatasetResolver::new(
            portal.clone(),
            DatasetTarget::AutoCreate(DatasetSpec::default()),
        );
        let creds = credentials(&portal);

        let err = resolver.resolve(&creds).await.unwrap_err();
        assert!(matches!(err, AppError::DatasetUnavailable(_)));
        assert!(err.is_fatal());
        assert!(resolver.dataset_id().is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_fails_fast() {
        let portal = DatasetPortal::default();
        let resolver = DatasetResolver::new(portal.clone(), DatasetTarget::Unconfigured);
        let creds = credentials(&portal);

        let err = resolver.resolve(&creds).await.unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
        assert_eq!(portal.logins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_token_refreshes_once_before_creating() {
        let portal = DatasetPortal {
            reject_first_token: true,
            ..DatasetPortal::default()
        };
        let resolver = DatasetResolver::new(
            portal.clone(),
            DatasetTarget::AutoCreate(DatasetSpec::default()),
        );
        let creds = credentials(&portal);

        assert_eq!(resolver.resolve(&creds).await.unwrap(), "ds-1");
        assert_eq!(portal.logins.load(Ordering::SeqCst), 2);
    }
}
