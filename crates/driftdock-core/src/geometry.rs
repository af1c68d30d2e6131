//! Placing media inside a container for the fit and fill modes.

use driftdock_platform::Frame;
use glam::Vec2;

use crate::media::FitMode;

/// Places media of `natural` size inside `container`.
///
/// The fitted rectangle is scaled uniformly by `scale` and shifted by
/// `offset` pixels, centred in the container. Returns `None` for degenerate
/// input so callers can keep their last valid layout.
pub fn layout_media(
    container: Vec2,
    natural: Vec2,
    fit: FitMode,
    scale: f32,
    offset: Vec2,
) -> Option<Frame> {
    if !is_positive(container) || !is_positive(natural) || !(scale > 0.0) || !scale.is_finite() {
        return None;
    }

    let ratios = container / natural;
    let ratio = match fit {
        FitMode::Fit => ratios.min_element(),
        FitMode::Fill => ratios.max_element(),
    };
    let size = natural * ratio * scale;
    let origin = (container - size) * 0.5 + offset;
    Some(Frame::new(origin.x, origin.y, size.x, size.y))
}

fn is_positive(size: Vec2) -> bool {
    size.x > 0.0 && size.y > 0.0 && size.is_finite()
}
