use zvariant::{Type, Value};

/// Side length of the rendered icon in pixels.
pub const ICON_SIZE: usize = 256;
/// Fraction of the canvas left empty on every side.
pub const PADDING: f64 = 0.08;
/// Samples per pixel along each axis.
pub const SUPERSAMPLE: usize = 2;
/// View box of the glyph outline (width, height).
pub const VIEW_BOX: (f64, f64) = (448.0, 512.0);

const CURVE_STEPS: usize = 16;
const INNER_SCALE: f64 = 0.64;
const INNER_CENTER: Point = Point { x: 224.0, y: 236.0 };

/// A raw image as transported by the item protocol: `(iiay)`.
#[derive(Debug, Clone, PartialEq, Eq, Type, Value)]
pub struct IconPixmap {
    pub width: i32,
    pub height: i32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Palette {
    body: [u8; 3],
    inner: [u8; 3],
}

const CONNECTED: Palette = Palette {
    body: [0x1f, 0xa8, 0x5a],
    inner: [0xe6, 0xf7, 0xec],
};

const DISCONNECTED: Palette = Palette {
    body: [0x6b, 0x72, 0x80],
    inner: [0xf0, 0xf1, 0xf3],
};

fn palette(connected: bool) -> Palette {
    if connected {
        CONNECTED
    } else {
        DISCONNECTED
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

const fn pt(x: f64, y: f64) -> Point {
    Point { x, y }
}

/// Outline segments of the shield in view box coordinates.
enum Segment {
    Line(Point),
    Quad(Point, Point),
}

const SHIELD: [Segment; 7] = [
    Segment::Quad(pt(328.0, 52.0), pt(448.0, 80.0)),
    Segment::Line(pt(448.0, 232.0)),
    Segment::Quad(pt(432.0, 424.0), pt(224.0, 512.0)),
    Segment::Quad(pt(16.0, 424.0), pt(0.0, 232.0)),
    Segment::Line(pt(0.0, 80.0)),
    Segment::Quad(pt(120.0, 52.0), pt(224.0, 0.0)),
    Segment::Line(pt(224.0, 0.0)),
];
const SHIELD_START: Point = pt(224.0, 0.0);

fn flatten(start: Point, segments: &[Segment]) -> Vec<Point> {
    let mut points = vec![start];
    let mut current = start;
    for segment in segments {
        match *segment {
            Segment::Line(to) => {
                if to != current {
                    points.push(to);
                }
                current = to;
            }
            Segment::Quad(ctrl, to) => {
                for step in 1..=CURVE_STEPS {
                    let t = step as f64 / CURVE_STEPS as f64;
                    let mt = 1.0 - t;
                    points.push(pt(
                        mt * mt * current.x + 2.0 * mt * t * ctrl.x + t * t * to.x,
                        mt * mt * current.y + 2.0 * mt * t * ctrl.y + t * t * to.y,
                    ));
                }
                current = to;
            }
        }
    }
    points
}

fn inset(points: &[Point], center: Point, scale: f64) -> Vec<Point> {
    points
        .iter()
        .map(|p| pt(center.x + (p.x - center.x) * scale, center.y + (p.y - center.y) * scale))
        .collect()
}

/// Maps view box coordinates onto the padded canvas, keeping the aspect ratio.
fn to_canvas(points: &[Point], size: f64) -> Vec<Point> {
    let padding = size * PADDING;
    let available = size - 2.0 * padding;
    let scale = (available / VIEW_BOX.0).min(available / VIEW_BOX.1);
    let offset_x = (size - VIEW_BOX.0 * scale) / 2.0;
    let offset_y = (size - VIEW_BOX.1 * scale) / 2.0;
    points
        .iter()
        .map(|p| pt(offset_x + p.x * scale, offset_y + p.y * scale))
        .collect()
}

/// Sorted x positions where the horizontal line at `y` crosses the polygon.
fn crossings(polygon: &[Point], y: f64) -> Vec<f64> {
    let mut xs = Vec::new();
    for (i, a) in polygon.iter().enumerate() {
        let b = &polygon[(i + 1) % polygon.len()];
        if (a.y <= y) != (b.y <= y) {
            xs.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
        }
    }
    xs.sort_by(f64::total_cmp);
    xs
}

fn inside(crossings: &[f64], x: f64) -> bool {
    crossings.partition_point(|&c| c < x) % 2 == 1
}

/// Renders the tray icon for the given connection state.
///
/// The output is deterministic: the same input always yields the same bytes.
pub fn render(connected: bool) -> IconPixmap {
    render_sized(connected, ICON_SIZE)
}

fn render_sized(connected: bool, size: usize) -> IconPixmap {
    let colors = palette(connected);
    let outline = flatten(SHIELD_START, &SHIELD);
    let outer = to_canvas(&outline, size as f64);
    let inner = to_canvas(&inset(&outline, INNER_CENTER, INNER_SCALE), size as f64);

    let samples = size * SUPERSAMPLE;
    let mut sums = vec![[0u32; 4]; size * size];
    for sy in 0..samples {
        let y = (sy as f64 + 0.5) / SUPERSAMPLE as f64;
        let outer_xs = crossings(&outer, y);
        if outer_xs.is_empty() {
            continue;
        }
        let inner_xs = crossings(&inner, y);
        for sx in 0..samples {
            let x = (sx as f64 + 0.5) / SUPERSAMPLE as f64;
            let color = if inside(&inner_xs, x) {
                colors.inner
            } else if inside(&outer_xs, x) {
                colors.body
            } else {
                continue;
            };
            let acc = &mut sums[(sy / SUPERSAMPLE) * size + sx / SUPERSAMPLE];
            acc[0] += 255;
            acc[1] += u32::from(color[0]);
            acc[2] += u32::from(color[1]);
            acc[3] += u32::from(color[2]);
        }
    }

    let per_pixel = (SUPERSAMPLE * SUPERSAMPLE) as u32;
    let mut data = Vec::with_capacity(size * size * 4);
    for acc in sums {
        for channel in acc {
            data.push(((channel + per_pixel / 2) / per_pixel) as u8);
        }
    }

    IconPixmap {
        width: size as i32,
        height: size as i32,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(icon: &IconPixmap, x: usize, y: usize) -> [u8; 4] {
        let i = (y * icon.width as usize + x) * 4;
        [icon.data[i], icon.data[i + 1], icon.data[i + 2], icon.data[i + 3]]
    }

    #[test]
    fn test_render_dimensions() {
        for connected in [true, false] {
            let icon = render(connected);
            assert_eq!(icon.width, ICON_SIZE as i32);
            assert_eq!(icon.height, ICON_SIZE as i32);
            assert_eq!(icon.data.len(), ICON_SIZE * ICON_SIZE * 4);
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(render(true), render(true));
        assert_eq!(render(false), render(false));
    }

    #[test]
    fn test_states_differ() {
        assert_ne!(render(true).data, render(false).data);
    }

    #[test]
    fn test_padding_is_transparent() {
        let icon = render(true);
        let edge = (ICON_SIZE as f64 * PADDING) as usize - 1;
        for i in 0..ICON_SIZE {
            assert_eq!(pixel(&icon, i, 0)[0], 0);
            assert_eq!(pixel(&icon, 0, i)[0], 0);
            assert_eq!(pixel(&icon, i, edge)[0], 0);
            assert_eq!(pixel(&icon, ICON_SIZE - 1, i)[0], 0);
        }
    }

    #[test]
    fn test_glyph_colors() {
        let icon = render(true);
        let middle = ICON_SIZE / 2;
        assert_eq!(pixel(&icon, middle, middle), [255, 0xe6, 0xf7, 0xec]);

        // between the inner inset and the outer edge, on the vertical axis
        let body = pixel(&icon, middle, (ICON_SIZE as f64 * 0.14) as usize);
        assert_eq!(body, [255, 0x1f, 0xa8, 0x5a]);

        let grey = render(false);
        assert_eq!(pixel(&grey, middle, middle), [255, 0xf0, 0xf1, 0xf3]);
    }

    #[test]
    fn test_premultiplied_and_antialiased() {
        let icon = render(false);
        let mut partial = 0;
        for px in icon.data.chunks_exact(4) {
            assert!(px[1] <= px[0] && px[2] <= px[0] && px[3] <= px[0]);
            if px[0] > 0 && px[0] < 255 {
                partial += 1;
            }
        }
        assert!(partial > 0, "edges should be antialiased");
    }

    #[test]
    fn test_aspect_ratio_preserved() {
        let icon = render_sized(true, 64);
        let opaque_columns: Vec<usize> = (0..64)
            .filter(|&x| (0..64).any(|y| pixel(&icon, x, y)[0] > 0))
            .collect();
        let opaque_rows: Vec<usize> = (0..64)
            .filter(|&y| (0..64).any(|x| pixel(&icon, x, y)[0] > 0))
            .collect();
        let width = opaque_columns.len() as f64;
        let height = opaque_rows.len() as f64;
        assert!((width / height - VIEW_BOX.0 / VIEW_BOX.1).abs() < 0.06);
    }
}
