use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const SHARE_HOSTS: [&str; 2] = ["www.dropbox.com", "dropbox.com"];
const DIRECT_HOST: &str = "dl.dropboxusercontent.com";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("empty audio location")]
    Empty,

    #[error("invalid audio URL {0}: {1}")]
    InvalidUrl(String, String),

    #[error("unsupported audio location: {0}")]
    Unsupported(String),
}

/// Where a lecture's audio lives, decided once when the recording is
/// ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AudioLocation {
    /// Absolute http(s) URL, already rewritten to a direct download link.
    Remote { url: String },
    /// A file served by the lecture server under `/uploads/`.
    Local { filename: String },
}

impl AudioLocation {
    /// Classify a stored audio reference: a URL, an `/uploads/...` path or
    /// a bare file name.
    pub fn parse(raw: &str) -> Result<Self, LocationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(LocationError::Empty);
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            let url = Url::parse(raw)
                .map_err(|e| LocationError::InvalidUrl(raw.to_string(), e.to_string()))?;
            return Ok(AudioLocation::Remote {
                url: direct_download(url).to_string(),
            });
        }

        let filename = raw
            .strip_prefix("/uploads/")
            .or_else(|| raw.strip_prefix("uploads/"))
            .unwrap_or(raw);

        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(LocationError::Unsupported(raw.to_string()));
        }

        Ok(AudioLocation::Local {
            filename: filename.to_string(),
        })
    }

    /// The URL to fetch this audio from.
    pub fn network_url(&self, media_base: &Url) -> Result<Url, url::ParseError> {
        match self {
            AudioLocation::Remote { url } => Url::parse(url),
            AudioLocation::Local { filename } => media_base.join(&format!("uploads/{}", filename)),
        }
    }

    /// Last path segment, used to look the file up in a local folder.
    pub fn file_name(&self) -> Option<String> {
        match self {
            AudioLocation::Local { filename } => Some(filename.clone()),
            AudioLocation::Remote { url } => file_name_of(url),
        }
    }
}

/// Last non-empty path segment of `url`.
pub fn file_name_of(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

/// Rewrite file-sharing page links into direct download links.
fn direct_download(mut url: Url) -> Url {
    let is_share = url
        .host_str()
        .is_some_and(|host| SHARE_HOSTS.contains(&host));
    if !is_share {
        return url;
    }

    if url.set_host(Some(DIRECT_HOST)).is_err() {
        return url;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "dl")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_links_become_direct_downloads() {
        let loc = AudioLocation::parse("https://www.dropbox.com/s/abc/lecture.mp3?dl=0").unwrap();
        assert_eq!(
            loc,
            AudioLocation::Remote {
                url: "https://dl.dropboxusercontent.com/s/abc/lecture.mp3".to_string()
            }
        );

        let keyed =
            AudioLocation::parse("https://www.dropbox.com/scl/fi/x/a.mp3?rlkey=k&dl=0").unwrap();
        assert_eq!(
            keyed,
            AudioLocation::Remote {
                url: "https://dl.dropboxusercontent.com/scl/fi/x/a.mp3?rlkey=k".to_string()
            }
        );
    }

    #[test]
    fn other_urls_are_untouched() {
        let loc = AudioLocation::parse("https://host/audio/42.mp3?dl=0").unwrap();
        assert_eq!(
            loc,
            AudioLocation::Remote {
                url: "https://host/audio/42.mp3?dl=0".to_string()
            }
        );
    }

    #[test]
    fn upload_paths_and_names_are_local() {
        let base = Url::parse("http://localhost:3000/").unwrap();
        for raw in ["/uploads/123.mp3", "uploads/123.mp3", "123.mp3"] {
            let loc = AudioLocation::parse(raw).unwrap();
            assert_eq!(
                loc,
                AudioLocation::Local {
                    filename: "123.mp3".to_string()
                }
            );
            assert_eq!(
                loc.network_url(&base).unwrap().as_str(),
                "http://localhost:3000/uploads/123.mp3"
            );
        }
    }

    #[test]
    fn rejects_paths_outside_uploads() {
        assert_eq!(AudioLocation::parse("  "), Err(LocationError::Empty));
        assert!(matches!(
            AudioLocation::parse("../etc/passwd"),
            Err(LocationError::Unsupported(_))
        ));
        assert!(matches!(
            AudioLocation::parse("/var/audio/a.mp3"),
            Err(LocationError::Unsupported(_))
        ));
    }

    #[test]
    fn file_name_comes_from_last_segment() {
        let loc = AudioLocation::parse("https://host/audio/42.mp3").unwrap();
        assert_eq!(loc.file_name().as_deref(), Some("42.mp3"));
    }
}
