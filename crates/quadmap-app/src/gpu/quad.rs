//! Canvas-space geometry to clip-space vertices.
//!
//! The whole canvas is stretched over the viewport, so a canvas point maps to
//! the same clip position in every output regardless of window size.

use bytemuck::{Pod, Zeroable};

use crate::surface::{CanvasSize, Point};

pub type Rgba = [f32; 4];

/// Vertex of a warped textured quad. `uvq` carries projective texture
/// coordinates: the fragment samples at `uvq.xy / uvq.z`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct TexturedVertex {
    pub position: [f32; 2],
    pub uvq: [f32; 3],
    pub opacity: f32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct SolidVertex {
    pub position: [f32; 2],
    pub color: Rgba,
}

/// Texture corner for each stored corner slot.
pub const QUAD_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

const QUAD_TRIANGLES: [usize; 6] = [0, 1, 2, 0, 2, 3];

pub fn canvas_to_clip(p: Point, canvas: CanvasSize) -> [f32; 2] {
    [
        p[0] / canvas.width * 2.0 - 1.0,
        1.0 - p[1] / canvas.height * 2.0,
    ]
}

/// Window position (physical pixels, top-left origin) to canvas space.
/// `None` for a zero-sized viewport.
pub fn viewport_to_canvas(pos: (f64, f64), viewport: (u32, u32), canvas: CanvasSize) -> Option<Point> {
    let (vw, vh) = viewport;
    if vw == 0 || vh == 0 {
        return None;
    }
    Some([
        (pos.0 * f64::from(canvas.width) / f64::from(vw)) as f32,
        (pos.1 * f64::from(canvas.height) / f64::from(vh)) as f32,
    ])
}

fn sub(a: Point, b: Point) -> Point {
    [a[0] - b[0], a[1] - b[1]]
}

fn cross(a: Point, b: Point) -> f32 {
    a[0] * b[1] - a[1] * b[0]
}

fn len(a: Point) -> f32 {
    a[0].hypot(a[1])
}

/// Where the diagonals p0-p2 and p1-p3 cross, if they cross inside both.
fn diagonal_intersection(c: &[Point; 4]) -> Option<Point> {
    let d1 = sub(c[2], c[0]);
    let d2 = sub(c[3], c[1]);
    let denom = cross(d1, d2);
    if denom.abs() < f32::EPSILON {
        return None;
    }
    let w = sub(c[1], c[0]);
    let t = cross(w, d2) / denom;
    let s = cross(w, d1) / denom;
    let inside = 0.0..=1.0;
    if !inside.contains(&t) || !inside.contains(&s) {
        return None;
    }
    Some([c[0][0] + t * d1[0], c[0][1] + t * d1[1]])
}

/// Per-corner q weights that make two triangles sample like one projective
/// quad. Non-convex or degenerate quads fall back to plain affine halves.
pub fn projective_weights(corners: &[Point; 4]) -> [f32; 4] {
    let Some(center) = diagonal_intersection(corners) else {
        return [1.0; 4];
    };
    let d: [f32; 4] = std::array::from_fn(|i| len(sub(corners[i], center)));
    let mut q = [1.0; 4];
    for i in 0..4 {
        let opposite = d[(i + 2) % 4];
        if opposite <= f32::EPSILON {
            return [1.0; 4];
        }
        q[i] = (d[i] + opposite) / opposite;
    }
    q
}

/// Two triangles mapping the full texture onto `corners`.
pub fn textured_quad(corners: &[Point; 4], opacity: f32, canvas: CanvasSize) -> [TexturedVertex; 6] {
    let q = projective_weights(corners);
    QUAD_TRIANGLES.map(|i| {
        let [u, v] = QUAD_UVS[i];
        TexturedVertex {
            position: canvas_to_clip(corners[i], canvas),
            uvq: [u * q[i], v * q[i], q[i]],
            opacity,
        }
    })
}

pub fn solid_quad(corners: &[Point; 4], color: Rgba, canvas: CanvasSize) -> [SolidVertex; 6] {
    QUAD_TRIANGLES.map(|i| SolidVertex {
        position: canvas_to_clip(corners[i], canvas),
        color,
    })
}

/// Converts between canvas points and viewport pixels for screen-constant
/// line widths and handle sizes.
#[derive(Debug, Clone, Copy)]
pub struct PixelSpace {
    pub canvas: CanvasSize,
    pub viewport: (u32, u32),
}

impl PixelSpace {
    fn to_px(self, p: Point) -> Point {
        [
            p[0] / self.canvas.width * self.viewport.0 as f32,
            p[1] / self.canvas.height * self.viewport.1 as f32,
        ]
    }

    fn px_to_clip(self, p: Point) -> [f32; 2] {
        [
            p[0] / self.viewport.0.max(1) as f32 * 2.0 - 1.0,
            1.0 - p[1] / self.viewport.1.max(1) as f32 * 2.0,
        ]
    }

    fn rect(self, out: &mut Vec<SolidVertex>, quad: [Point; 4], color: Rgba) {
        for i in QUAD_TRIANGLES {
            out.push(SolidVertex {
                position: self.px_to_clip(quad[i]),
                color,
            });
        }
    }

    /// Closed outline through the four corners, `width` pixels wide.
    pub fn outline(self, out: &mut Vec<SolidVertex>, corners: &[Point; 4], width: f32, color: Rgba) {
        let half = width * 0.5;
        for i in 0..4 {
            let a = self.to_px(corners[i]);
            let b = self.to_px(corners[(i + 1) % 4]);
            let dir = sub(b, a);
            let l = len(dir);
            if l <= f32::EPSILON {
                continue;
            }
            // Extend along the segment so adjacent edges overlap at the joints.
            let t = [dir[0] / l * half, dir[1] / l * half];
            let n = [-t[1], t[0]];
            let a = [a[0] - t[0], a[1] - t[1]];
            let b = [b[0] + t[0], b[1] + t[1]];
            self.rect(
                out,
                [
                    [a[0] + n[0], a[1] + n[1]],
                    [b[0] + n[0], b[1] + n[1]],
                    [b[0] - n[0], b[1] - n[1]],
                    [a[0] - n[0], a[1] - n[1]],
                ],
                color,
            );
        }
    }

    /// A `size`-pixel square centered on each corner.
    pub fn handles(self, out: &mut Vec<SolidVertex>, corners: &[Point; 4], size: f32, color: Rgba) {
        let h = size * 0.5;
        for c in corners {
            let [x, y] = self.to_px(*c);
            self.rect(
                out,
                [[x - h, y - h], [x + h, y - h], [x + h, y + h], [x - h, y + h]],
                color,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANVAS: CanvasSize = CanvasSize {
        width: 1920.0,
        height: 1080.0,
    };

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn canvas_corners_map_to_clip_corners() {
        assert_eq!(canvas_to_clip([0.0, 0.0], CANVAS), [-1.0, 1.0]);
        assert_eq!(canvas_to_clip([1920.0, 1080.0], CANVAS), [1.0, -1.0]);
        assert_eq!(canvas_to_clip([960.0, 540.0], CANVAS), [0.0, 0.0]);
    }

    #[test]
    fn viewport_scales_to_canvas() {
        let p = viewport_to_canvas((480.0, 270.0), (960, 540), CANVAS).unwrap();
        assert_eq!(p, [960.0, 540.0]);
        assert!(viewport_to_canvas((1.0, 1.0), (0, 540), CANVAS).is_none());
    }

    #[test]
    fn rectangle_has_equal_weights() {
        let q = projective_weights(&[[0.0, 0.0], [100.0, 0.0], [100.0, 50.0], [0.0, 50.0]]);
        for w in q {
            assert!(approx(w, 2.0));
        }
    }

    #[test]
    fn trapezoid_weights_favor_long_edge() {
        // Wide top edge, narrow bottom edge.
        let q = projective_weights(&[[0.0, 0.0], [200.0, 0.0], [150.0, 100.0], [50.0, 100.0]]);
        assert!(q[0] > q[2]);
        assert!(approx(q[0], q[1]));
        assert!(approx(q[2], q[3]));
    }

    #[test]
    fn concave_quad_falls_back_to_affine() {
        let q = projective_weights(&[[0.0, 0.0], [100.0, 0.0], [20.0, 20.0], [0.0, 100.0]]);
        assert_eq!(q, [1.0; 4]);
    }

    #[test]
    fn textured_quad_maps_texture_corners_in_order() {
        let corners = [[0.0, 0.0], [1920.0, 0.0], [1920.0, 1080.0], [0.0, 1080.0]];
        let v = textured_quad(&corners, 0.5, CANVAS);
        assert_eq!(v[0].position, [-1.0, 1.0]);
        let uv = |vx: &TexturedVertex| [vx.uvq[0] / vx.uvq[2], vx.uvq[1] / vx.uvq[2]];
        assert_eq!(uv(&v[0]), [0.0, 0.0]);
        assert_eq!(uv(&v[1]), [1.0, 0.0]);
        assert_eq!(uv(&v[2]), [1.0, 1.0]);
        assert_eq!(uv(&v[5]), [0.0, 1.0]);
        assert!(v.iter().all(|x| x.opacity == 0.5));
    }

    #[test]
    fn outline_and_handles_emit_two_triangles_per_piece() {
        let ps = PixelSpace {
            canvas: CANVAS,
            viewport: (1920, 1080),
        };
        let corners = [[100.0, 100.0], [300.0, 100.0], [300.0, 300.0], [100.0, 300.0]];
        let mut out = Vec::new();
        ps.outline(&mut out, &corners, 2.0, [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(out.len(), 24);
        out.clear();
        ps.handles(&mut out, &corners, 8.0, [1.0, 1.0, 0.0, 1.0]);
        assert_eq!(out.len(), 24);
        // First handle is centered on the first corner.
        let xs: Vec<f32> = out[..6].iter().map(|v| v.position[0]).collect();
        let cx = canvas_to_clip(corners[0], CANVAS)[0];
        let max = xs.iter().copied().fold(f32::MIN, f32::max);
        let min = xs.iter().copied().fold(f32::MAX, f32::min);
        let mid = (max + min) / 2.0;
        assert!(approx(mid, cx));
    }

    #[test]
    fn degenerate_edges_are_skipped() {
        let ps = PixelSpace {
            canvas: CANVAS,
            viewport: (800, 600),
        };
        let mut out = Vec::new();
        ps.outline(&mut out, &[[5.0, 5.0]; 4], 2.0, [1.0; 4]);
        assert!(out.is_empty());
    }
}
