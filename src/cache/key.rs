use crate::DerivativeError;
use std::fmt;
use std::str::FromStr;

/// Separator between resource id and variant in a rendered key.
///
/// The variant is always the last segment and no variant name contains the
/// separator, so splitting on the last occurrence is unambiguous even when a
/// resource id contains it.
const KEY_SEPARATOR: &str = "::";

/// A named derivative of a resource's original image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Variant {
    Small,
    #[default]
    Medium,
    Large,
    Original,
}

impl Variant {
    pub const ALL: [Variant; 4] = [Variant::Small, Variant::Medium, Variant::Large, Variant::Original];

    /// Square box size for this variant, `None` for no resize.
    pub fn target_size(self) -> Option<u32> {
        match self {
            Variant::Small => Some(100),
            Variant::Medium => Some(300),
            Variant::Large => Some(600),
            Variant::Original => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Small => "small",
            Variant::Medium => "medium",
            Variant::Large => "large",
            Variant::Original => "original",
        }
    }

    /// Lenient parse used at the request boundary: anything unrecognized
    /// is treated as `medium`.
    pub fn from_query(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(Variant::Small),
            "medium" => Ok(Variant::Medium),
            "large" => Ok(Variant::Large),
            "original" => Ok(Variant::Original),
            _ => Err(format!("Unknown variant: {}", s)),
        }
    }
}

/// Identity of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivativeKey {
    resource_id: String,
    variant: Variant,
}

impl DerivativeKey {
    /// Builds the key for `(resource_id, variant)`. An empty or blank
    /// resource id is rejected.
    pub fn new(resource_id: &str, variant: Variant) -> Result<Self, DerivativeError> {
        validate_resource_id(resource_id)?;
        Ok(Self { resource_id: resource_id.to_string(), variant })
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// True iff this key was built from `resource_id`, for any variant.
    pub fn belongs_to(&self, resource_id: &str) -> bool {
        self.resource_id == resource_id
    }

    /// Parses a key previously produced by `to_string`.
    pub fn parse(rendered: &str) -> Option<Self> {
        let (resource_id, variant) = rendered.rsplit_once(KEY_SEPARATOR)?;
        let variant = variant.parse().ok()?;
        Self::new(resource_id, variant).ok()
    }
}

impl fmt::Display for DerivativeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.resource_id, KEY_SEPARATOR, self.variant)
    }
}

/// Renders the stable string key for `(resource_id, variant)`.
pub fn make_key(resource_id: &str, variant: Variant) -> Result<String, DerivativeError> {
    DerivativeKey::new(resource_id, variant).map(|k| k.to_string())
}

/// True iff `key` was rendered by `make_key(resource_id, _)`.
pub fn belongs_to(key: &str, resource_id: &str) -> bool {
    DerivativeKey::parse(key).is_some_and(|k| k.belongs_to(resource_id))
}

pub(crate) fn validate_resource_id(resource_id: &str) -> Result<(), DerivativeError> {
    if resource_id.trim().is_empty() {
        return Err(DerivativeError::Validation("Resource id must not be empty".into()));
    }
    Ok(())
}
