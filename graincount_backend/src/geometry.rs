//! Coordinate conversions and polygon primitives for the counting canvas.
//!
//! Pixel space: origin top-left, x right, y down, canvas `(W, H)`.
//! Map space ("latlng"): both axes normalised by the image *width*, so
//! `lng = x / W` and `lat = (H − y) / W`; `lat` spans `[0, H/W]`.

use serde::{Serialize, Deserialize};

/// Map coordinates. On the wire this is a `[lat, lng]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl From<[f64; 2]> for LatLng {
    fn from(v: [f64; 2]) -> Self {
        LatLng { lat: v[0], lng: v[1] }
    }
}

impl From<LatLng> for [f64; 2] {
    fn from(ll: LatLng) -> Self {
        [ll.lat, ll.lng]
    }
}

/// 2×3 affine for the mica overlay, row-major `[[x0, y0, t0], [x1, y1, t1]]`.
pub type Matrix2x3 = [[f64; 3]; 2];

pub fn pixels_to_latlng(x: f64, y: f64, w: i32, h: i32) -> LatLng {
    let w = f64::from(w);
    LatLng {
        lat: (f64::from(h) - y) / w,
        lng: x / w,
    }
}

pub fn latlng_to_pixels(ll: LatLng, w: i32, h: i32) -> (i32, i32) {
    let wf = f64::from(w);
    let x = ll.lng * wf;
    let y = f64::from(h) - ll.lat * wf;
    (x.round() as i32, y.round() as i32)
}

/// Applies the mica view mapping to a map point. With a matrix present, the
/// 2×2 linear block acts about the canvas centre `(0.5, 0.5)`; the third
/// column is carried in stored transforms but takes no part here. Without a
/// matrix the mica view is the mirror image `lng' = 1 − lng`.
pub fn mica_latlng(ll: LatLng, matrix: Option<&Matrix2x3>) -> LatLng {
    match matrix {
        Some(m) => {
            let x = ll.lng - 0.5;
            let y = ll.lat - 0.5;
            LatLng {
                lng: 0.5 + x * m[0][0] + y * m[0][1],
                lat: 0.5 + x * m[1][0] + y * m[1][1],
            }
        }
        None => {
            LatLng {
                lat: ll.lat,
                lng: 1.0 - ll.lng,
            }
        }
    }
}

/// Signed shoelace area of a polygon in vertex storage order.
/// Positive when the vertices wind counter-clockwise in y-up coordinates.
pub fn polygon_area_signed(points: &[(f64, f64)]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for (i, &(x1, y1)) in points.iter().enumerate() {
        let (x2, y2) = points[(i + 1) % points.len()];
        sum += x1 * y2 - x2 * y1;
    }
    sum / 2.0
}

pub fn polygon_area(points: &[(f64, f64)]) -> f64 {
    polygon_area_signed(points).abs()
}

/// Area in mm² when both pixel scales are known.
pub fn area_mm2(area_pixels: f64, scale_x: Option<f64>, scale_y: Option<f64>) -> Option<f64> {
    match (scale_x, scale_y) {
        (Some(sx), Some(sy)) => Some(sx * sy * area_pixels * 1e6),
        _ => None,
    }
}

/// Even-odd ray cast. Points exactly on an edge count as inside or outside
/// depending on rounding; callers don't rely on edge cases.
pub fn point_in_polygon(p: (f64, f64), poly: &[(f64, f64)]) -> bool {
    let (px, py) = p;
    let mut inside = false;
    let n = poly.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = poly[i];
        let (xj, yj) = poly[j];
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Membership over all regions of a grain: the even-odd rule extends across
/// polygons, so a second polygon drawn inside the first acts as a hole.
pub fn point_in_regions(p: (f64, f64), regions: &[Vec<(f64, f64)>]) -> bool {
    let mut inside = false;
    for poly in regions {
        if point_in_polygon(p, poly) {
            inside = !inside;
        }
    }
    inside
}

/// Net area of a region set under the same even-odd rule: a ring nested
/// inside an odd number of other rings is a hole and subtracts.
pub fn regions_area(regions: &[Vec<(f64, f64)>]) -> f64 {
    let mut total = 0.0;
    for (i, ring) in regions.iter().enumerate() {
        let vertex = match ring.first() {
            Some(&p) => p,
            None => continue,
        };
        let depth = regions
            .iter()
            .enumerate()
            .filter(|&(j, other)| j != i && point_in_polygon(vertex, other))
            .count();
        if depth % 2 == 0 {
            total += polygon_area(ring);
        } else {
            total -= polygon_area(ring);
        }
    }
    total
}


#[test]
fn test_latlng_roundtrip() {
    let (w, h) = (1292, 968);
    for &(x, y) in &[(0, 0), (w, h), (646, 484), (1, 967), (1291, 1)] {
        let ll = pixels_to_latlng(f64::from(x), f64::from(y), w, h);
        assert_eq!((x, y), latlng_to_pixels(ll, w, h));
    }
}

#[test]
fn test_latlng_convention() {
    // Bottom-left pixel corner maps to the map origin.
    let ll = pixels_to_latlng(0.0, 968.0, 1292, 968);
    assert_eq!(ll, LatLng { lat: 0.0, lng: 0.0 });
    let ll = pixels_to_latlng(1292.0, 0.0, 1292, 968);
    assert!((ll.lng - 1.0).abs() < 1e-12);
    assert!((ll.lat - 968.0 / 1292.0).abs() < 1e-12);
}

#[test]
fn test_mica_default_reflection() {
    let ll = LatLng { lat: 0.25, lng: 0.1 };
    let m = mica_latlng(ll, None);
    assert!((m.lng - 0.9).abs() < 1e-12);
    assert!((m.lat - 0.25).abs() < 1e-12);
}

#[test]
fn test_mica_matrix_identity_and_flip() {
    let ident: Matrix2x3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    let ll = LatLng { lat: 0.3, lng: 0.7 };
    assert_eq!(mica_latlng(ll, Some(&ident)), ll);

    // Horizontal flip about the centre equals the default reflection.
    let flip: Matrix2x3 = [[-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    let a = mica_latlng(ll, Some(&flip));
    let b = mica_latlng(ll, None);
    assert!((a.lng - b.lng).abs() < 1e-12);
    assert!((a.lat - b.lat).abs() < 1e-12);
}

#[test]
fn test_shoelace_against_triangle_fan() {
    // Signed fan decomposition from the first vertex is an independent
    // route to the same area.
    let poly = [(10.0, 10.0), (990.0, 10.0), (990.0, 790.0), (400.0, 900.0), (10.0, 790.0)];
    let mut fan = 0.0;
    let (x0, y0) = poly[0];
    for i in 1..poly.len() - 1 {
        let (x1, y1) = poly[i];
        let (x2, y2) = poly[i + 1];
        fan += (x1 - x0) * (y2 - y0) - (x2 - x0) * (y1 - y0);
    }
    fan /= 2.0;
    assert!((polygon_area_signed(&poly) - fan).abs() < 1e-9);
}

#[test]
fn test_rectangle_area() {
    let rect = [(10.0, 10.0), (990.0, 10.0), (990.0, 790.0), (10.0, 790.0)];
    assert!((polygon_area(&rect) - 980.0 * 780.0).abs() < 1e-9);
    assert_eq!(area_mm2(polygon_area(&rect), Some(1e-4), Some(1e-4)), Some(980.0 * 780.0 * 1e-8 * 1e6));
    assert_eq!(area_mm2(1.0, Some(1.0), None), None);
}

#[test]
fn test_point_in_regions_hole() {
    let outer = vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)];
    let hole = vec![(40.0, 40.0), (60.0, 40.0), (60.0, 60.0), (40.0, 60.0)];
    let regions = vec![outer, hole];
    assert!(point_in_regions((20.0, 20.0), &regions));
    assert!(!point_in_regions((50.0, 50.0), &regions));
    assert!(!point_in_regions((150.0, 50.0), &regions));
}

#[test]
fn test_regions_area_subtracts_holes() {
    let outer = vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)];
    let hole = vec![(40.0, 40.0), (60.0, 40.0), (60.0, 60.0), (40.0, 60.0)];
    let island = vec![(45.0, 45.0), (55.0, 45.0), (55.0, 55.0), (45.0, 55.0)];

    assert!((regions_area(&[outer.clone()]) - 10000.0).abs() < 1e-9);
    assert!((regions_area(&[outer.clone(), hole.clone()]) - 9600.0).abs() < 1e-9);
    // The even-odd chain continues: a ring inside a hole adds back.
    assert!((regions_area(&[outer, hole, island]) - 9700.0).abs() < 1e-9);

    // Disjoint rings just sum.
    let left = vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
    let right = vec![(20.0, 0.0), (30.0, 0.0), (30.0, 10.0), (20.0, 10.0)];
    assert!((regions_area(&[left, right]) - 200.0).abs() < 1e-9);
}
