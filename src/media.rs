//! Display URLs for post media.
//!
//! Posts carry media in whatever shape the writing backend produced: pinned
//! image uploads (`hash` + file names), or video entries keyed by `url`,
//! `src` or `hash`. [`MediaResolver`] turns those into URLs a client can load.

use serde::Serialize;

use crate::db::{PostMediaType, PostRow, VideoSource};

/// What listings show for a post.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: String,
    pub media_type: PostMediaType,
    pub prompt: Option<String>,
    pub primary_url: Option<String>,
    pub urls: Vec<String>,
    /// Media not attached yet.
    pub pending: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MediaResolver {
    gateway_url: String,
    cdn_url: Option<String>,
}

impl MediaResolver {
    pub fn new(gateway_url: &str, cdn_url: Option<&str>) -> Self {
        Self {
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            cdn_url: cdn_url
                .filter(|u| !u.is_empty())
                .map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Every image URL of a post, in upload order.
    pub fn image_urls(&self, post: &PostRow) -> Vec<String> {
        let Some(images) = post.ipfs_images.as_ref() else {
            return Vec::new();
        };
        images
            .iter()
            .filter(|img| !img.hash.is_empty())
            .flat_map(|img| {
                if img.file_names.is_empty() {
                    vec![self.content_url(&img.hash, None)]
                } else {
                    img.file_names
                        .iter()
                        .map(|name| self.content_url(&img.hash, Some(name)))
                        .collect()
                }
            })
            .collect()
    }

    /// Every playable video URL of a post.
    pub fn video_urls(&self, post: &PostRow) -> Vec<String> {
        let Some(data) = post.video_data.as_ref() else {
            return Vec::new();
        };
        data.sources()
            .into_iter()
            .filter_map(|s| self.video_url(s))
            .collect()
    }

    /// The URL shown as the post's thumbnail / primary media.
    pub fn primary_url(&self, post: &PostRow) -> Option<String> {
        self.video_urls(post)
            .into_iter()
            .next()
            .or_else(|| self.image_urls(post).into_iter().next())
    }

    pub fn view(&self, post: &PostRow) -> PostView {
        let mut urls = self.video_urls(post);
        urls.extend(self.image_urls(post));
        PostView {
            id: post.id.clone(),
            media_type: post.media_type,
            prompt: post.prompt.clone(),
            primary_url: self.primary_url(post),
            urls,
            pending: !post.is_displayable(),
            created_at: post.created_at.clone(),
        }
    }

    fn video_url(&self, source: &VideoSource) -> Option<String> {
        if let Some(url) = source.url.as_deref().filter(|u| !u.is_empty()) {
            return Some(self.absolute(url));
        }
        if let Some(src) = source.src.as_deref().filter(|u| !u.is_empty()) {
            return Some(self.absolute(src));
        }
        source
            .hash
            .as_deref()
            .filter(|h| !h.is_empty())
            .map(|h| self.content_url(h, None))
    }

    /// Content-addressed URL, served from the CDN when one is configured.
    fn content_url(&self, hash: &str, file_name: Option<&str>) -> String {
        let base = self.cdn_url.as_deref().unwrap_or(&self.gateway_url);
        match file_name {
            Some(name) => format!("{base}/{hash}/{name}"),
            None => format!("{base}/{hash}"),
        }
    }

    /// Absolute URLs pass through; gateway URLs move to the CDN; bare
    /// paths are resolved against the gateway.
    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            let under_gateway = url
                .strip_prefix(self.gateway_url.as_str())
                .filter(|rest| rest.is_empty() || rest.starts_with('/'));
            match (self.cdn_url.as_deref(), under_gateway) {
                (Some(cdn), Some(rest)) => format!("{cdn}{rest}"),
                _ => url.to_string(),
            }
        } else {
            format!("{}/{}", self.gateway_url, url.trim_start_matches('/'))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::post;
    use crate::db::{IpfsImage, VideoData};

    const GATEWAY: &str = "https://gateway.example/ipfs";

    #[test]
    fn image_urls_expand_file_names() {
        let resolver = MediaResolver::new(GATEWAY, None);
        let mut p = post("p", "a", "t");
        p.ipfs_images = Some(vec![
            IpfsImage {
                hash: "Qm1".into(),
                file_names: vec!["0.png".into(), "1.png".into()],
            },
            IpfsImage {
                hash: "Qm2".into(),
                file_names: vec![],
            },
        ]);
        assert_eq!(
            resolver.image_urls(&p),
            vec![
                "https://gateway.example/ipfs/Qm1/0.png",
                "https://gateway.example/ipfs/Qm1/1.png",
                "https://gateway.example/ipfs/Qm2",
            ]
        );
    }

    #[test]
    fn video_prefers_url_then_src_then_hash() {
        let resolver = MediaResolver::new(GATEWAY, None);
        let mut p = post("p", "a", "t");
        p.ipfs_images = None;
        p.video_data = Some(VideoData::Many(vec![
            VideoSource {
                hash: Some("QmV".into()),
                url: Some("https://files.example/a.mp4".into()),
                src: Some("ignored".into()),
            },
            VideoSource {
                src: Some("videos/b.mp4".into()),
                ..Default::default()
            },
            VideoSource {
                hash: Some("QmC".into()),
                ..Default::default()
            },
            VideoSource::default(),
        ]));
        assert_eq!(
            resolver.video_urls(&p),
            vec![
                "https://files.example/a.mp4",
                "https://gateway.example/ipfs/videos/b.mp4",
                "https://gateway.example/ipfs/QmC",
            ]
        );
    }

    #[test]
    fn cdn_rewrites_gateway_urls_only() {
        let resolver = MediaResolver::new(GATEWAY, Some("https://cdn.example/"));
        let mut p = post("p", "a", "t");
        p.video_data = Some(VideoData::Many(vec![
            VideoSource::from_url("https://gateway.example/ipfs/QmX/v.mp4"),
            VideoSource::from_url("https://other.example/v.mp4"),
        ]));
        assert_eq!(
            resolver.video_urls(&p),
            vec!["https://cdn.example/QmX/v.mp4", "https://other.example/v.mp4"]
        );
        assert_eq!(resolver.image_urls(&p), vec!["https://cdn.example/Qmabc/0.png"]);
    }

    #[test]
    fn cdn_rewrite_stops_at_path_boundary() {
        let resolver = MediaResolver::new(GATEWAY, Some("https://cdn.example"));
        let mut p = post("p", "a", "t");
        p.video_data = Some(VideoData::Many(vec![
            VideoSource::from_url("https://gateway.example/ipfs2/x.mp4"),
            VideoSource::from_url("https://gateway.example/ipfs"),
        ]));
        assert_eq!(
            resolver.video_urls(&p),
            vec!["https://gateway.example/ipfs2/x.mp4", "https://cdn.example"]
        );
    }

    #[test]
    fn primary_url_prefers_video() {
        let resolver = MediaResolver::new(GATEWAY, None);
        let mut p = post("p", "a", "t");
        assert_eq!(
            resolver.primary_url(&p).as_deref(),
            Some("https://gateway.example/ipfs/Qmabc/0.png")
        );
        p.video_data = Some(VideoData::One(VideoSource::from_url("https://v.example/x.mp4")));
        assert_eq!(resolver.primary_url(&p).as_deref(), Some("https://v.example/x.mp4"));
        p.video_data = None;
        p.ipfs_images = None;
        assert!(resolver.primary_url(&p).is_none());
    }

    #[test]
    fn view_marks_posts_without_media_pending() {
        let resolver = MediaResolver::new(GATEWAY, None);
        let mut p = post("p", "a", "2026-01-01T00:00:00Z");
        let view = resolver.view(&p);
        assert!(!view.pending);
        assert_eq!(view.primary_url, resolver.primary_url(&p));

        p.ipfs_images = None;
        let view = resolver.view(&p);
        assert!(view.pending);
        assert!(view.urls.is_empty());
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["mediaType"], "IMAGE");
        assert_eq!(json["createdAt"], "2026-01-01T00:00:00Z");
    }
}
