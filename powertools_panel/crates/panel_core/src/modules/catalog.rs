use crate::modules::backend::BackendClient;
use crate::modules::error::{PanelError, PanelResult};
use crate::modules::protocol::{StoreMetadata, VariantInfo};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_ATTEMPTS: u32 = 3;

/// Community settings catalog.
pub trait Catalog: Send + Sync {
    fn search_by_app_id<'a>(&'a self, app_id: &'a str)
        -> BoxFuture<'a, PanelResult<Vec<StoreMetadata>>>;

    /// Downloads an entry into the active profile; returns the new variant list.
    fn download_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, PanelResult<Vec<VariantInfo>>>;
}

/// Catalog access proxied through the backend.
pub struct BackendCatalog {
    backend: Arc<BackendClient>,
}

impl BackendCatalog {
    pub fn new(backend: Arc<BackendClient>) -> Self {
        Self { backend }
    }
}

impl Catalog for BackendCatalog {
    fn search_by_app_id<'a>(
        &'a self,
        app_id: &'a str,
    ) -> BoxFuture<'a, PanelResult<Vec<StoreMetadata>>> {
        self.backend.search_store_by_app_id(app_id).boxed()
    }

    fn download_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, PanelResult<Vec<VariantInfo>>> {
        self.backend.store_download_by_id(id).boxed()
    }
}

/// Searches the catalog web API directly; downloads still go through the
/// backend since only it can persist a variant.
pub struct HttpCatalog {
    client: reqwest::Client,
    base: Url,
    backend: Arc<BackendClient>,
}

impl HttpCatalog {
    pub fn new(base: &str, backend: Arc<BackendClient>) -> PanelResult<Self> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            base,
            backend,
        })
    }

    pub fn search_url(&self, app_id: &str) -> PanelResult<Url> {
        Ok(self.base.join(&format!("api/setting/by_app_id/{app_id}"))?)
    }

    async fn search(&self, app_id: &str) -> PanelResult<Vec<StoreMetadata>> {
        let url = self.search_url(app_id)?;
        let mut backoff = Duration::from_millis(500);
        for attempt in 1..=MAX_ATTEMPTS {
            let resp = self.client.get(url.clone()).send().await?;
            let status = resp.status();
            if status.is_success() {
                return Ok(resp.json::<Vec<StoreMetadata>>().await?);
            }
            let body = resp.text().await.unwrap_or_default();

            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if !retryable || attempt == MAX_ATTEMPTS {
                return Err(PanelError::BadStatus { status, body });
            }
            debug!("catalog search for {app_id} got {status}, retrying in {backoff:?}");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(5));
        }
        Err(PanelError::Transport(
            "catalog search exhausted retries".to_string(),
        ))
    }
}

impl Catalog for HttpCatalog {
    fn search_by_app_id<'a>(
        &'a self,
        app_id: &'a str,
    ) -> BoxFuture<'a, PanelResult<Vec<StoreMetadata>>> {
        self.search(app_id).boxed()
    }

    fn download_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, PanelResult<Vec<VariantInfo>>> {
        self.backend.store_download_by_id(id).boxed()
    }
}
