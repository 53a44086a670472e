use crate::cache::Variant;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// How a source image is fitted into a square target box.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum FitPolicy {
    /// Scale to cover the box, then center-crop to exactly the box.
    Cover,
    /// Scale down to fit inside the box; never upscale.
    Inside,
}

impl fmt::Display for FitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitPolicy::Cover => write!(f, "cover"),
            FitPolicy::Inside => write!(f, "inside"),
        }
    }
}

impl FromStr for FitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cover" => Ok(FitPolicy::Cover),
            "inside" => Ok(FitPolicy::Inside),
            _ => Err(format!("Invalid fit policy: {}", s)),
        }
    }
}

/// The two families of images the service manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Avatar,
    Image,
}

impl ResourceKind {
    pub fn fit(self) -> FitPolicy {
        match self {
            ResourceKind::Avatar => FitPolicy::Cover,
            ResourceKind::Image => FitPolicy::Inside,
        }
    }

    /// Box size uploads are normalized to before they reach storage.
    pub fn upload_size(self) -> u32 {
        match self {
            ResourceKind::Avatar => 400,
            ResourceKind::Image => 800,
        }
    }

    /// Path segment used both for routes and for the storage service.
    pub fn collection(self) -> &'static str {
        match self {
            ResourceKind::Avatar => "avatars",
            ResourceKind::Image => "images",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Avatar => "avatar",
            ResourceKind::Image => "image",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Query parameters accepted when reading a derivative.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DerivativeQuery {
    /// Requested variant name; anything unrecognized means `medium`.
    #[serde(default)]
    pub variant: Option<String>,

    /// Serve with `Content-Disposition: attachment`.
    #[serde(default)]
    pub download: bool,
}

impl DerivativeQuery {
    pub fn variant(&self) -> Variant {
        self.variant
            .as_deref()
            .map(Variant::from_query)
            .unwrap_or_default()
    }
}

impl FromStr for DerivativeQuery {
    type Err = serde_urlencoded::de::Error;

    /// Parse a raw URL query string
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_urlencoded::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_defaults_to_medium_inline() {
        let q: DerivativeQuery = "".parse().unwrap();
        assert_eq!(q.variant(), Variant::Medium);
        assert!(!q.download);
    }

    #[test]
    fn parses_variant_and_download() {
        let q: DerivativeQuery = "variant=small&download=true".parse().unwrap();
        assert_eq!(q.variant(), Variant::Small);
        assert!(q.download);
    }

    #[test]
    fn unknown_variant_falls_back() {
        let q: DerivativeQuery = "variant=gigantic".parse().unwrap();
        assert_eq!(q.variant(), Variant::Medium);
    }

    #[test]
    fn malformed_download_flag_is_an_error() {
        assert!("download=maybe".parse::<DerivativeQuery>().is_err());
    }

    #[test]
    fn kinds_carry_their_policies() {
        assert_eq!(ResourceKind::Avatar.fit(), FitPolicy::Cover);
        assert_eq!(ResourceKind::Image.fit(), FitPolicy::Inside);
        assert_eq!("INSIDE".parse::<FitPolicy>().unwrap(), FitPolicy::Inside);
    }
}
