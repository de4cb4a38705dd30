//! Plain data shared by the pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Posts,
    Stories,
}

impl ContentType {
    pub const ALL: [ContentType; 2] = [ContentType::Posts, ContentType::Stories];

    pub fn placement(self) -> Placement {
        match self {
            ContentType::Posts => Placement::Post,
            ContentType::Stories => Placement::Story,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Posts => "posts",
            ContentType::Stories => "stories",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "posts" | "post" => Ok(ContentType::Posts),
            "stories" | "story" => Ok(ContentType::Stories),
            other => Err(format!("unknown content type '{other}' (expected posts or stories)")),
        }
    }
}

/// Where a delivered item lands on the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Post,
    Story,
}

impl Placement {
    pub fn as_str(self) -> &'static str {
        match self {
            Placement::Post => "post",
            Placement::Story => "story",
        }
    }
}

/// Everything chosen for one piece of content. Built once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentRequest {
    pub genre: String,
    pub sub_genre: Option<String>,
    pub theme: Option<String>,
    pub style: Option<String>,
    pub palette: Option<String>,
    pub placement: Placement,
    pub resolution: (u32, u32),
}

impl ContentRequest {
    /// Size string in the `WxH` form providers expect.
    pub fn size(&self) -> String {
        format!("{}x{}", self.resolution.0, self.resolution.1)
    }
}

/// Raw provider output plus the request that produced it.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub raw_bytes: Vec<u8>,
    pub metadata: ContentRequest,
    pub prompt: String,
}

/// Parses `1024x1024` style sizes.
pub fn parse_resolution(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.trim().split_once(['x', 'X'])?;
    let w = w.trim().parse::<u32>().ok()?;
    let h = h.trim().parse::<u32>().ok()?;
    if w == 0 || h == 0 {
        return None;
    }
    Some((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resolution_strings() {
        assert_eq!(parse_resolution("1024x1024"), Some((1024, 1024)));
        assert_eq!(parse_resolution(" 1792X1024 "), Some((1792, 1024)));
        assert_eq!(parse_resolution("1024"), None);
        assert_eq!(parse_resolution("0x10"), None);
        assert_eq!(parse_resolution("axb"), None);
    }

    #[test]
    fn content_type_maps_to_placement() {
        assert_eq!(ContentType::Posts.placement(), Placement::Post);
        assert_eq!(ContentType::Stories.placement(), Placement::Story);
        assert_eq!("story".parse::<ContentType>(), Ok(ContentType::Stories));
        assert!("reels".parse::<ContentType>().is_err());
    }
}
