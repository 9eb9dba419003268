use ledgerbridge::Result;
use ledgerbridge_api::{MediaAsset, SyncError};
use reqwest::multipart::{Form, Part};
use tracing::{debug, info};

use crate::client::RestClient;
use crate::models::WpMedia;

/// The WordPress media library (`wp-json/wp/v2/media`), authenticated with
/// an application password.
pub struct WordpressMedia {
    api: RestClient,
}

impl WordpressMedia {
    pub fn new(api: RestClient) -> Self {
        Self { api }
    }

    pub async fn search(&self, file_name: &str) -> Result<Option<MediaAsset>> {
        let found: Vec<WpMedia> = self
            .api
            .get("media", &[("search", file_name.to_string())])
            .await?
            .unwrap_or_default();
        debug!(
            "[WordpressMedia] {} matches for {}",
            found.len(),
            file_name
        );
        Ok(found.into_iter().next().map(MediaAsset::from))
    }

    pub async fn upload(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<MediaAsset> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| {
                SyncError::invalid(format!("Invalid content type {}: {}", content_type, e))
            })?;
        let media: WpMedia = self
            .api
            .post_multipart("media", Form::new().part("file", part))
            .await?;
        info!("[WordpressMedia] uploaded {} as {}", file_name, media.id);
        Ok(media.into())
    }

    /// Deletes permanently; the media endpoint has no trash.
    pub async fn delete(&self, id: u64) -> Result<()> {
        self.api
            .delete(&format!("media/{}", id), &[("force", "true".to_string())])
            .await?;
        info!("[WordpressMedia] deleted media {}", id);
        Ok(())
    }
}
