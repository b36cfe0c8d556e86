//! File naming convention shared by the downloader, the combiner and the
//! metadata writer.
//!
//! `<identity><role-suffix>.<ext>`, where the role suffix is one of
//! `_base`, `-base`, `_main`, `-main` (base), `_overlay`, `-overlay`
//! (overlay) or `_combined` (composite). Identities compare exactly,
//! case included.

use memget_core::models::record::MediaKind;

use crate::models::media::ContentFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Base,
    Overlay,
    Composite,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Base => "main",
            Role::Overlay => "overlay",
            Role::Composite => "combined",
        }
    }
}

const ROLE_SUFFIXES: &[(&str, Role)] = &[
    ("_overlay", Role::Overlay),
    ("-overlay", Role::Overlay),
    ("_combined", Role::Composite),
    ("_base", Role::Base),
    ("-base", Role::Base),
    ("_main", Role::Base),
    ("-main", Role::Base),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaName {
    pub identity: String,
    pub role: Role,
    pub kind: MediaKind,
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("'{0}' has no extension")]
    MissingExtension(String),
    #[error("'{0}' is not an image or video")]
    UnsupportedExtension(String),
    #[error("'{0}' carries no base/overlay role")]
    MissingRole(String),
    #[error("'{0}' has an empty identity")]
    EmptyIdentity(String),
}

pub fn parse(file_name: &str) -> Result<MediaName, NameError> {
    let (stem, ext) = file_name
        .rsplit_once('.')
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .ok_or_else(|| NameError::MissingExtension(file_name.to_string()))?;

    let kind = ContentFormat::from_extension(ext)
        .and_then(|f| f.media_kind())
        .ok_or_else(|| NameError::UnsupportedExtension(file_name.to_string()))?;

    let (identity, role) = ROLE_SUFFIXES
        .iter()
        .find_map(|(suffix, role)| stem.strip_suffix(suffix).map(|id| (id, *role)))
        .ok_or_else(|| NameError::MissingRole(file_name.to_string()))?;

    if identity.is_empty() {
        return Err(NameError::EmptyIdentity(file_name.to_string()));
    }

    Ok(MediaName {
        identity: identity.to_string(),
        role,
        kind,
        extension: ext.to_string(),
    })
}

/// Name of the composite for `identity`, keeping the base's extension.
pub fn composite_name(identity: &str, base_extension: &str) -> String {
    format!("{}_combined.{}", identity, base_extension)
}

/// Name given to a role-bearing file extracted from a record's archive.
pub fn member_name(stem: &str, role: Role, extension: &str) -> String {
    format!("{}-{}.{}", stem, role.as_str(), extension.to_ascii_lowercase())
}

pub fn is_overlay(file_name: &str) -> bool {
    matches!(parse(file_name), Ok(MediaName { role: Role::Overlay, .. }))
}
