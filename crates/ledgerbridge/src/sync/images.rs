//! Attached images → ordered remote image list.
//!
//! The primary image goes first, then the remaining public image attachments
//! in creation order. Each resolved URL appears once. Existing remote entries
//! are reused by exact URL; otherwise the media library is searched by file
//! name before falling back to a new entry the remote will sideload.

use async_trait::async_trait;
use ledgerbridge_api::{Attachment, ImageRef, MediaAsset};
use std::collections::HashSet;
use tracing::debug;

use crate::Result;

pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

pub fn is_image_file(path: &str) -> bool {
    let name = file_name_of(path);
    match name.rsplit_once('.') {
        Some((_, ext)) => IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Last path segment of a URL or file path, without query string.
pub fn file_name_of(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// Absolute URL for a file, or `None` when it cannot be served publicly.
pub fn public_url(file_url: &str, is_private: bool, site_domain: Option<&str>) -> Option<String> {
    if is_private || file_url.is_empty() {
        return None;
    }
    if file_url.starts_with("http://") || file_url.starts_with("https://") {
        return Some(file_url.to_string());
    }
    let domain = site_domain?;
    let path = if file_url.starts_with('/') {
        file_url.to_string()
    } else {
        format!("/{}", file_url)
    };
    Some(format!("https://{}{}", domain, path))
}

#[async_trait]
pub trait MediaLookup: Send + Sync {
    async fn find_media(&self, file_name: &str) -> Result<Option<MediaAsset>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageReconciliation {
    pub images: Vec<ImageRef>,
    pub changed: bool,
}

pub struct ImageReconciler<'a> {
    site_domain: Option<&'a str>,
    media: Option<&'a dyn MediaLookup>,
}

impl<'a> ImageReconciler<'a> {
    pub fn new(site_domain: Option<&'a str>) -> Self {
        Self {
            site_domain,
            media: None,
        }
    }

    pub fn with_media(mut self, media: &'a dyn MediaLookup) -> Self {
        self.media = Some(media);
        self
    }

    /// `primary` is the file URL of the designated primary image, if any.
    pub async fn reconcile(
        &self,
        current: &[ImageRef],
        attachments: &[Attachment],
        primary: Option<&str>,
    ) -> Result<ImageReconciliation> {
        let mut ordered: Vec<(String, Option<&Attachment>)> = Vec::new();
        let mut seen_urls = HashSet::new();

        if let Some(primary_file) = primary {
            let attachment = attachments.iter().find(|a| a.file_url == primary_file);
            let is_private = attachment.map(|a| a.is_private).unwrap_or(false);
            if let Some(url) = public_url(primary_file, is_private, self.site_domain) {
                seen_urls.insert(url.clone());
                ordered.push((url, attachment));
            }
        }

        let mut gallery: Vec<&Attachment> = attachments
            .iter()
            .filter(|a| is_image_file(&a.file_url) || is_image_file(&a.file_name))
            .collect();
        gallery.sort_by_key(|a| a.created);
        for attachment in gallery {
            if let Some(url) = public_url(&attachment.file_url, attachment.is_private, self.site_domain)
            {
                if seen_urls.insert(url.clone()) {
                    ordered.push((url, Some(attachment)));
                }
            }
        }

        let mut images = Vec::with_capacity(ordered.len());
        for (url, attachment) in ordered {
            images.push(self.resolve(current, &url, attachment).await?);
        }

        let changed = images.len() != current.len()
            || images.iter().zip(current).any(|(new, old)| new.src != old.src);
        debug!(
            "[ImageReconciler] {} images resolved, changed={}",
            images.len(),
            changed
        );

        Ok(ImageReconciliation { images, changed })
    }

    async fn resolve(
        &self,
        current: &[ImageRef],
        url: &str,
        attachment: Option<&Attachment>,
    ) -> Result<ImageRef> {
        if let Some(existing) = current.iter().find(|img| img.src == url) {
            return Ok(existing.clone());
        }

        if let Some(media) = self.media {
            if let Some(asset) = media.find_media(file_name_of(url)).await? {
                return Ok(ImageRef {
                    id: Some(asset.id),
                    src: asset.source_url,
                    date_created: None,
                });
            }
        }

        Ok(ImageRef {
            id: None,
            src: url.to_string(),
            date_created: attachment.map(|a| a.created.format("%Y-%m-%dT%H:%M:%S").to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DOMAIN: &str = "erp.example.com";

    fn attachment(name: &str, secs: i64, private: bool) -> Attachment {
        Attachment {
            name: name.to_string(),
            attached_to: "ITEM".into(),
            file_name: name.to_string(),
            file_url: format!("/files/{}", name),
            is_private: private,
            created: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs),
        }
    }

    fn url(name: &str) -> String {
        format!("https://{}/files/{}", DOMAIN, name)
    }

    struct CountingMedia {
        calls: AtomicUsize,
        asset: Option<MediaAsset>,
    }

    #[async_trait]
    impl MediaLookup for CountingMedia {
        async fn find_media(&self, _file_name: &str) -> Result<Option<MediaAsset>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.asset.clone())
        }
    }

    #[test]
    fn test_public_url_rules() {
        assert_eq!(public_url("/files/a.png", false, Some(DOMAIN)), Some(url("a.png")));
        assert_eq!(
            public_url("https://cdn.example.com/a.png", false, None).as_deref(),
            Some("https://cdn.example.com/a.png")
        );
        assert_eq!(public_url("/private/files/a.png", true, Some(DOMAIN)), None);
        assert_eq!(public_url("/files/a.png", false, None), None);
    }

    #[test]
    fn test_image_extension_filter() {
        assert!(is_image_file("/files/photo.JPG"));
        assert!(is_image_file("https://x/y/z.gif?ver=2"));
        assert!(!is_image_file("/files/manual.pdf"));
        assert!(!is_image_file("/files/noext"));
    }

    #[tokio::test]
    async fn test_primary_first_then_creation_order_without_duplicates() {
        let attachments = vec![
            attachment("b.png", 30, false),
            attachment("p.jpg", 20, false),
            attachment("a.png", 10, false),
            attachment("secret.png", 5, true),
            attachment("notes.pdf", 1, false),
        ];
        let reconciler = ImageReconciler::new(Some(DOMAIN));
        let result = reconciler
            .reconcile(&[], &attachments, Some("/files/p.jpg"))
            .await
            .unwrap();

        let srcs: Vec<String> = result.images.iter().map(|i| i.src.clone()).collect();
        assert_eq!(srcs, vec![url("p.jpg"), url("a.png"), url("b.png")]);
        assert!(result.changed);
        assert!(result.images.iter().all(|i| i.id.is_none()));
    }

    #[tokio::test]
    async fn test_unchanged_gallery_reports_no_change() {
        let attachments = vec![
            attachment("p.jpg", 1, false),
            attachment("a.png", 2, false),
            attachment("b.png", 3, false),
        ];
        let current = vec![
            ImageRef {
                id: Some(11),
                src: url("p.jpg"),
                date_created: None,
            },
            ImageRef {
                id: Some(12),
                src: url("a.png"),
                date_created: None,
            },
            ImageRef {
                id: Some(13),
                src: url("b.png"),
                date_created: None,
            },
        ];
        let media = CountingMedia {
            calls: AtomicUsize::new(0),
            asset: None,
        };
        let reconciler = ImageReconciler::new(Some(DOMAIN)).with_media(&media);
        let result = reconciler
            .reconcile(&current, &attachments, Some("/files/p.jpg"))
            .await
            .unwrap();

        assert!(!result.changed);
        assert_eq!(result.images, current);
        assert_eq!(media.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_media_library_match_reuses_id() {
        let attachments = vec![attachment("a.png", 1, false)];
        let media = CountingMedia {
            calls: AtomicUsize::new(0),
            asset: Some(MediaAsset {
                id: 77,
                source_url: "https://shop.example.com/wp-content/uploads/a.png".into(),
                title: Some("a.png".into()),
            }),
        };
        let reconciler = ImageReconciler::new(Some(DOMAIN)).with_media(&media);
        let result = reconciler.reconcile(&[], &attachments, None).await.unwrap();

        assert_eq!(result.images.len(), 1);
        assert_eq!(result.images[0].id, Some(77));
        assert_eq!(media.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_removed_image_is_a_change() {
        let current = vec![
            ImageRef {
                id: Some(1),
                src: url("a.png"),
                date_created: None,
            },
            ImageRef {
                id: Some(2),
                src: url("b.png"),
                date_created: None,
            },
        ];
        let attachments = vec![attachment("a.png", 1, false)];
        let result = ImageReconciler::new(Some(DOMAIN))
            .reconcile(&current, &attachments, None)
            .await
            .unwrap();
        assert!(result.changed);
        assert_eq!(result.images.len(), 1);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn gallery_order_ignores_attachment_order(
                order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle(),
                primary in 0..6usize,
            ) {
                let attachments: Vec<Attachment> = order
                    .iter()
                    .map(|n| attachment(&format!("img{}.png", n), *n as i64, false))
                    .collect();
                let primary_url = format!("/files/img{}.png", primary);
                let reconciler = ImageReconciler::new(Some(DOMAIN));

                let first = futures::executor::block_on(
                    reconciler.reconcile(&[], &attachments, Some(&primary_url)),
                )
                .unwrap();
                let mut expected = vec![url(&format!("img{}.png", primary))];
                expected.extend(
                    (0..6usize)
                        .filter(|n| *n != primary)
                        .map(|n| url(&format!("img{}.png", n))),
                );
                let srcs: Vec<String> = first.images.iter().map(|i| i.src.clone()).collect();
                prop_assert_eq!(srcs, expected);

                let second = futures::executor::block_on(
                    reconciler.reconcile(&first.images, &attachments, Some(&primary_url)),
                )
                .unwrap();
                prop_assert!(!second.changed);
            }
        }
    }
}
