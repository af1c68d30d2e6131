//! Persisted window geometry and edge snapping.

use driftdock_platform::{DisplayInfo, Frame};

/// Used when a record carries no usable geometry.
pub const DEFAULT_DOCK_FRAME: Frame = Frame::new(120.0, 120.0, 360.0, 240.0);

/// Accepts `"{{x, y}, {w, h}}"` as well as a bare `"x,y,w,h"`.
pub fn parse_geometry(raw: &str) -> Option<Frame> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '{' | '}') && !c.is_whitespace())
        .collect();
    let values = cleaned
        .split(',')
        .map(|part| part.parse::<f32>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<_>>>()?;
    let [x, y, width, height] = values.as_slice() else {
        return None;
    };
    let frame = Frame::new(*x, *y, *width, *height);
    (!frame.is_empty()).then_some(frame)
}

pub fn format_geometry(frame: &Frame) -> String {
    format!(
        "{{{{{}, {}}}, {{{}, {}}}}}",
        frame.x, frame.y, frame.width, frame.height
    )
}

/// Pulls `frame` flush to any edge of its display that lies within `threshold`.
///
/// The display is the one containing the frame's centre; frames whose centre
/// is off every display are left alone.
pub fn snap_to_edges(frame: Frame, displays: &[DisplayInfo], threshold: f32) -> Frame {
    let (cx, cy) = frame.center();
    let Some(screen) = displays
        .iter()
        .map(|display| Frame::from(display.rect))
        .find(|screen| screen.contains(cx, cy))
    else {
        return frame;
    };

    let mut snapped = frame;
    if (frame.x - screen.x).abs() <= threshold {
        snapped.x = screen.x;
    } else if (frame.x + frame.width - (screen.x + screen.width)).abs() <= threshold {
        snapped.x = screen.x + screen.width - frame.width;
    }
    if (frame.y - screen.y).abs() <= threshold {
        snapped.y = screen.y;
    } else if (frame.y + frame.height - (screen.y + screen.height)).abs() <= threshold {
        snapped.y = screen.y + screen.height - frame.height;
    }
    snapped
}

#[cfg(test)]
mod tests {
    use driftdock_platform::{DisplayId, MonitorRect};

    use super::*;

    fn display(id: &str, x: i32, y: i32, width: i32, height: i32) -> DisplayInfo {
        DisplayInfo {
            id: DisplayId::from(id),
            rect: MonitorRect {
                x,
                y,
                width,
                height,
                dpi: 96,
            },
            primary: id == "1",
        }
    }

    #[test]
    fn both_geometry_forms_parse() {
        let expected = Frame::new(10.0, 20.0, 300.0, 200.0);
        assert_eq!(parse_geometry("{{10, 20}, {300, 200}}"), Some(expected));
        assert_eq!(parse_geometry("10,20,300,200"), Some(expected));
        assert_eq!(parse_geometry(" 10, 20 ,300, 200 "), Some(expected));
    }

    #[test]
    fn bad_geometry_is_rejected() {
        assert_eq!(parse_geometry(""), None);
        assert_eq!(parse_geometry("{{1, 2}, {3}}"), None);
        assert_eq!(parse_geometry("a,b,c,d"), None);
        assert_eq!(parse_geometry("0,0,0,100"), None);
    }

    #[test]
    fn formatted_geometry_reads_back() {
        let frame = Frame::new(-40.5, 12.0, 320.0, 180.0);
        let text = format_geometry(&frame);
        assert_eq!(text, "{{-40.5, 12}, {320, 180}}");
        assert_eq!(parse_geometry(&text), Some(frame));
    }

    #[test]
    fn snaps_to_near_edges_of_containing_display() {
        let displays = [display("1", 0, 0, 1920, 1080), display("2", 1920, 0, 1280, 1024)];

        let near_left_top = Frame::new(12.0, 9.0, 200.0, 100.0);
        assert_eq!(
            snap_to_edges(near_left_top, &displays, 15.0),
            Frame::new(0.0, 0.0, 200.0, 100.0)
        );

        let near_right_of_second = Frame::new(2990.0, 500.0, 200.0, 100.0);
        assert_eq!(
            snap_to_edges(near_right_of_second, &displays, 15.0),
            Frame::new(3000.0, 500.0, 200.0, 100.0)
        );
    }

    #[test]
    fn far_or_offscreen_frames_stay_put() {
        let displays = [display("1", 0, 0, 1920, 1080)];
        let middle = Frame::new(400.0, 300.0, 200.0, 100.0);
        assert_eq!(snap_to_edges(middle, &displays, 15.0), middle);

        let offscreen = Frame::new(5000.0, 5000.0, 200.0, 100.0);
        assert_eq!(snap_to_edges(offscreen, &displays, 15.0), offscreen);
    }
}
