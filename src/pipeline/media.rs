//! Media fetch: metadata lookup, then authenticated download

use crate::channels::MediaResolver;

/// Outcome of fetching provider-hosted media
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFetch {
    Fetched { data: Vec<u8>, mime_type: String },
    /// Content could not be obtained; the caller degrades to a placeholder reply
    Unavailable { reason: String },
}

/// Resolve and download one media id
///
/// Never retries. Either step failing yields [`MediaFetch::Unavailable`].
pub async fn fetch_media(resolver: &dyn MediaResolver, media_id: &str) -> MediaFetch {
    let info = match resolver.resolve(media_id).await {
        Ok(info) => info,
        Err(e) => {
            return MediaFetch::Unavailable {
                reason: format!("metadata lookup for {media_id} failed: {e}"),
            };
        }
    };

    match resolver.download(&info.url).await {
        Ok(data) if data.is_empty() => MediaFetch::Unavailable {
            reason: format!("download of {media_id} returned no bytes"),
        },
        Ok(data) => MediaFetch::Fetched {
            data,
            mime_type: info.mime_type,
        },
        Err(e) => MediaFetch::Unavailable {
            reason: format!("download of {media_id} failed: {e}"),
        },
    }
}
