use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::info;
use reqwest::{Client, Url};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::collab::PackSource;
use crate::config::Settings;
use crate::error::CollabError;

/// Downloads packs from the pack distribution service:
/// `GET <endpoint>/packs/<id>?descending=true` returns the newest version.
#[derive(Debug, Clone)]
pub struct HttpPackSource {
    client: Client,
    endpoint: Option<Url>,
}

impl HttpPackSource {
    pub fn new(client: Client, endpoint: Option<Url>) -> Self {
        Self { client, endpoint }
    }

    /// Source for the endpoint configured in `settings`.
    pub fn from_settings(client: Client, settings: &Settings) -> Self {
        Self::new(client, settings.pack_endpoint.clone())
    }

    fn pack_url(&self, id: Uuid) -> Result<Url, CollabError> {
        let endpoint = self.endpoint.as_ref().ok_or(CollabError::NoPackEndpoint)?;
        let mut url = Url::parse(&format!(
            "{}/packs/{}",
            endpoint.as_str().trim_end_matches('/'),
            id
        ))
        .map_err(|e| CollabError::Failed(format!("invalid pack url: {}", e)))?;
        url.query_pairs_mut().append_pair("descending", "true");
        Ok(url)
    }
}

#[async_trait]
impl PackSource for HttpPackSource {
    async fn fetch_pack(
        &self,
        id: Uuid,
        destination: &Path,
        token: &CancellationToken,
    ) -> Result<(), CollabError> {
        let url = self.pack_url(id)?;
        info!("fetch_pack: {} from {}", id, url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(CollabError::PackStatus(response.status().as_u16()));
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if token.is_cancelled() {
                return Err(CollabError::Failed("pack download cancelled".into()));
            }
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}
