//! Video descriptor

use serde::{Deserialize, Serialize};

/// One entry of a room's queue or history.
///
/// Only the identifier is required on input; catalog metadata is carried
/// when known and defaulted otherwise. Two descriptors are the same video
/// exactly when their identifiers match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Length in seconds
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub duration_formatted: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub uploaded_at: String,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub url: String,
}

impl Video {
    /// Build a descriptor carrying nothing but the identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            duration: 0.0,
            duration_formatted: String::new(),
            thumbnail: String::new(),
            channel_name: String::new(),
            is_verified: false,
            uploaded_at: String::new(),
            views: 0,
            url: String::new(),
        }
    }
}

impl PartialEq for Video {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Video {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_by_id() {
        let mut a = Video::with_id("v1");
        a.title = "first upload".to_string();
        let b = Video::with_id("v1");
        let c = Video::with_id("v2");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_deserialize_partial() {
        let video: Video = serde_json::from_str(r#"{"id":"v1","duration":180}"#).unwrap();
        assert_eq!(video.id, "v1");
        assert_eq!(video.duration, 180.0);
        assert_eq!(video.views, 0);
        assert!(!video.is_verified);
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut video = Video::with_id("v1");
        video.channel_name = "someone".to_string();
        let json = serde_json::to_string(&video).unwrap();
        assert!(json.contains(r#""channelName":"someone""#));
        assert!(json.contains(r#""isVerified":false"#));
    }
}
