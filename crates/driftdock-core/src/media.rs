//! Media descriptors and image decoding.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use driftdock_platform::{DecodedImage, SkinRecord};
use glam::Vec2;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::error::MediaError;
use crate::resolver::MediaSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    None,
    Image,
    Video,
}

impl MediaKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image" | "gif" | "photo" => Self::Image,
            "video" | "movie" => Self::Video,
            _ => Self::None,
        }
    }

    pub fn as_raw(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Contain: the whole media is visible, letterboxed as needed.
    Fit,
    /// Cover: the container is filled, media is cropped as needed.
    #[default]
    Fill,
}

impl FitMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fit" | "aspectfit" | "contain" => Self::Fit,
            _ => Self::Fill,
        }
    }

    pub fn as_raw(&self) -> &'static str {
        match self {
            Self::Fit => "fit",
            Self::Fill => "fill",
        }
    }
}

/// Everything a surface needs to render one piece of media.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaDescriptor {
    pub source: MediaSource,
    pub kind: MediaKind,
    pub fit: FitMode,
    pub scale: f32,
    pub offset: Vec2,
    pub opacity: f32,
    pub muted: bool,
}

impl MediaDescriptor {
    pub fn new(source: MediaSource, kind: MediaKind) -> Self {
        Self {
            source,
            kind,
            fit: FitMode::Fill,
            scale: 1.0,
            offset: Vec2::ZERO,
            opacity: 1.0,
            muted: true,
        }
    }

    /// True when switching between the two requires a reload.
    pub fn same_media(&self, other: &Self) -> bool {
        self.source == other.source && self.kind == other.kind
    }

    /// Descriptor for a dock skin, or `None` when the skin shows nothing.
    pub fn from_skin(skin: &SkinRecord, source: Option<MediaSource>) -> Option<Self> {
        let kind = MediaKind::parse(&skin.kind);
        if kind == MediaKind::None {
            return None;
        }
        Some(Self {
            source: source?,
            kind,
            fit: FitMode::parse(&skin.fit_mode),
            scale: skin.scale,
            offset: Vec2::new(skin.offset_x, skin.offset_y),
            opacity: skin.opacity,
            muted: skin.muted,
        })
    }
}

/// Decodes the first frame and counts frames of animated GIFs.
pub fn decode_image(path: &Path) -> Result<DecodedImage, MediaError> {
    let decode_error = |source: image::ImageError| MediaError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let reader = image::io::Reader::open(path)
        .map_err(|err| decode_error(err.into()))?
        .with_guessed_format()
        .map_err(|err| decode_error(err.into()))?;
    let format = reader.format();
    let rgba = reader.decode().map_err(decode_error)?.to_rgba8();

    let frame_count = match format {
        Some(ImageFormat::Gif) => count_gif_frames(path).unwrap_or(1),
        _ => 1,
    };

    Ok(DecodedImage {
        width: rgba.width(),
        height: rgba.height(),
        frame_count,
        rgba: Arc::from(rgba.into_raw()),
    })
}

fn count_gif_frames(path: &Path) -> Option<usize> {
    let file = File::open(path).ok()?;
    let decoder = GifDecoder::new(BufReader::new(file)).ok()?;
    let frames = decoder.into_frames().take_while(Result::is_ok).count();
    Some(frames.max(1))
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;

    #[test]
    fn decodes_png_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        RgbaImage::from_pixel(12, 7, Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let decoded = decode_image(&path).unwrap();
        assert_eq!((decoded.width, decoded.height), (12, 7));
        assert_eq!(decoded.frame_count, 1);
        assert!(!decoded.is_animated());
        assert_eq!(decoded.rgba.len(), 12 * 7 * 4);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        assert!(matches!(
            decode_image(&path),
            Err(MediaError::Decode { .. })
        ));
    }

    #[test]
    fn skin_without_kind_has_no_descriptor() {
        let skin = SkinRecord::default();
        let source = MediaSource::parse("/a.png");
        assert!(MediaDescriptor::from_skin(&skin, source).is_none());
    }

    #[test]
    fn skin_maps_transform_fields() {
        let skin = SkinRecord {
            kind: "video".into(),
            path: Some("/clip.mov".into()),
            fit_mode: "fit".into(),
            scale: 1.5,
            offset_x: 4.0,
            offset_y: -2.0,
            opacity: 0.8,
            muted: false,
            ..SkinRecord::default()
        };
        let descriptor =
            MediaDescriptor::from_skin(&skin, MediaSource::parse("/clip.mov")).unwrap();
        assert_eq!(descriptor.kind, MediaKind::Video);
        assert_eq!(descriptor.fit, FitMode::Fit);
        assert_eq!(descriptor.offset, Vec2::new(4.0, -2.0));
        assert!(!descriptor.muted);
    }
}
