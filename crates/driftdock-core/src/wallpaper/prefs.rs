//! Persisted per-display wallpaper preferences.
//!
//! Stored as one JSON object keyed by display id. Two older shapes are still
//! read: a single preference object from before multi-display support, and a
//! bare dock id whose skin doubled as the wallpaper.

use std::collections::BTreeMap;

use driftdock_platform::{DisplayId, SkinRecord};
use glam::Vec2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PrefsError;
use crate::media::{FitMode, MediaDescriptor, MediaKind};
use crate::resolver::{MediaSource, ScopedReference};

/// Key under which the preference map lives in the key-value store.
pub const PREFS_KEY: &str = "wallpaperPreferences";

pub type WallpaperPrefs = BTreeMap<DisplayId, WallpaperPreference>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WallpaperPreference {
    pub url_path: String,
    #[serde(default, with = "grant_blob", skip_serializing_if = "Option::is_none")]
    pub access_grant_blob: Option<Vec<u8>>,
    #[serde(default = "default_kind")]
    pub media_kind_raw: String,
    #[serde(default = "default_fit")]
    pub fit_mode_raw: String,
    #[serde(default = "one")]
    pub scale: f32,
    #[serde(default)]
    pub offset_x: f32,
    #[serde(default)]
    pub offset_y: f32,
    #[serde(default = "one")]
    pub opacity: f32,
    #[serde(default = "yes")]
    pub is_muted: bool,
}

fn default_kind() -> String {
    MediaKind::Image.as_raw().to_string()
}

fn default_fit() -> String {
    FitMode::Fill.as_raw().to_string()
}

fn one() -> f32 {
    1.0
}

fn yes() -> bool {
    true
}

mod grant_blob {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(blob: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match blob {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let Some(text) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        STANDARD
            .decode(text.as_bytes())
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

impl WallpaperPreference {
    pub fn new(reference: ScopedReference, kind: MediaKind) -> Self {
        Self {
            url_path: reference.path,
            access_grant_blob: reference.grant,
            media_kind_raw: kind.as_raw().to_string(),
            fit_mode_raw: default_fit(),
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            opacity: 1.0,
            is_muted: true,
        }
    }

    /// A dock skin reused as a wallpaper.
    pub fn from_skin(skin: &SkinRecord) -> Option<Self> {
        let path = skin.path.clone()?;
        Some(Self {
            url_path: path,
            access_grant_blob: skin.grant.clone(),
            media_kind_raw: MediaKind::parse(&skin.kind).as_raw().to_string(),
            fit_mode_raw: FitMode::parse(&skin.fit_mode).as_raw().to_string(),
            scale: skin.scale,
            offset_x: skin.offset_x,
            offset_y: skin.offset_y,
            opacity: skin.opacity,
            is_muted: skin.muted,
        })
    }

    pub fn reference(&self) -> ScopedReference {
        ScopedReference {
            path: self.url_path.clone(),
            grant: self.access_grant_blob.clone(),
        }
    }

    pub fn set_reference(&mut self, reference: ScopedReference) {
        self.url_path = reference.path;
        self.access_grant_blob = reference.grant;
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::parse(&self.media_kind_raw)
    }

    pub fn descriptor(&self, source: Option<MediaSource>) -> Option<MediaDescriptor> {
        let kind = self.kind();
        if kind == MediaKind::None {
            return None;
        }
        Some(MediaDescriptor {
            source: source?,
            kind,
            fit: FitMode::parse(&self.fit_mode_raw),
            scale: self.scale,
            offset: Vec2::new(self.offset_x, self.offset_y),
            opacity: self.opacity,
            muted: self.is_muted,
        })
    }
}

/// Result of reading the stored blob.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPrefs {
    pub prefs: WallpaperPrefs,
    /// The blob was in an older shape and should be rewritten.
    pub upgraded: bool,
}

/// Reads any known shape of the stored blob.
///
/// `legacy_display` receives a single-object or dock-id preference;
/// `dock_skin` looks up the skin of an old dock record.
pub fn parse_prefs(
    raw: &str,
    legacy_display: &DisplayId,
    dock_skin: impl Fn(&str) -> Option<SkinRecord>,
) -> Result<LoadedPrefs, PrefsError> {
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        // The oldest builds stored the dock id unquoted.
        Err(_) if is_bare_identifier(raw) => Value::String(raw.trim().to_string()),
        Err(err) => return Err(err.into()),
    };

    let single_object = value.get("urlPath").is_some();
    match value {
        Value::Object(_) if single_object => {
            let single: WallpaperPreference = serde_json::from_value(value)?;
            Ok(LoadedPrefs {
                prefs: BTreeMap::from([(legacy_display.clone(), single)]),
                upgraded: true,
            })
        }
        Value::Object(_) => Ok(LoadedPrefs {
            prefs: serde_json::from_value(value)?,
            upgraded: false,
        }),
        Value::String(dock_id) => {
            let preference = dock_skin(&dock_id)
                .as_ref()
                .and_then(WallpaperPreference::from_skin)
                .ok_or(PrefsError::UnknownShape)?;
            Ok(LoadedPrefs {
                prefs: BTreeMap::from([(legacy_display.clone(), preference)]),
                upgraded: true,
            })
        }
        _ => Err(PrefsError::UnknownShape),
    }
}

pub fn serialize_prefs(prefs: &WallpaperPrefs) -> Result<String, PrefsError> {
    Ok(serde_json::to_string(prefs)?)
}

fn is_bare_identifier(raw: &str) -> bool {
    let raw = raw.trim();
    !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
