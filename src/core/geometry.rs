//! Region of interest built from the vertices of a shapefile.
//!
//! The polygon is an approximation of the shapes' footprint: every vertex of
//! every record is pooled and wrapped into a single ring.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::io::shapes::{read_shapes, Shape};
use crate::types::{BoundingBox, FloodError, FloodResult};

/// How the pooled vertices become a polygon ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoiConstruction {
    /// Convex hull of all vertices; always a simple polygon
    #[default]
    ConvexHull,
    /// Vertices in file order; may self-intersect
    PointOrder,
}

impl std::str::FromStr for RoiConstruction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "convex-hull" => Ok(RoiConstruction::ConvexHull),
            "point-order" => Ok(RoiConstruction::PointOrder),
            other => Err(format!("unknown ROI construction '{}'", other)),
        }
    }
}

/// Closed polygon in (lon, lat)
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    vertices: Vec<(f64, f64)>,
}

impl Geometry {
    pub fn from_points(points: &[(f64, f64)], construction: RoiConstruction) -> FloodResult<Self> {
        let mut vertices = match construction {
            RoiConstruction::ConvexHull => convex_hull(points),
            RoiConstruction::PointOrder => points.to_vec(),
        };
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        if vertices.len() < 3 {
            return Err(FloodError::Processing(format!(
                "region needs at least 3 distinct vertices, got {}",
                vertices.len()
            )));
        }
        Ok(Self { vertices })
    }

    /// Rectangle covering a bounding box
    pub fn rectangle(bbox: &BoundingBox) -> Self {
        Self {
            vertices: vec![
                (bbox.min_lon, bbox.min_lat),
                (bbox.max_lon, bbox.min_lat),
                (bbox.max_lon, bbox.max_lat),
                (bbox.min_lon, bbox.max_lat),
            ],
        }
    }

    /// Ring vertices without the closing repeat
    pub fn vertices(&self) -> &[(f64, f64)] {
        &self.vertices
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.vertices.iter().copied())
    }

    pub fn to_wkt(&self) -> String {
        let ring: Vec<String> = self
            .vertices
            .iter()
            .chain(self.vertices.first())
            .map(|(x, y)| format!("{} {}", x, y))
            .collect();
        format!("POLYGON (({}))", ring.join(", "))
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_wkt())
    }
}

/// Read a shapefile and wrap all of its vertices into one ROI polygon
pub fn load_roi<P: AsRef<Path>>(path: P, construction: RoiConstruction) -> FloodResult<Geometry> {
    let path = path.as_ref();
    let shapes = read_shapes(path)?;
    roi_from_shapes(&shapes, construction).map_err(|e| match e {
        already @ FloodError::GeometryRead { .. } => already,
        other => FloodError::GeometryRead { path: path.to_path_buf(), reason: other.to_string() },
    })
}

/// Pool the vertices of `shapes` into one polygon
pub fn roi_from_shapes(shapes: &[Shape], construction: RoiConstruction) -> FloodResult<Geometry> {
    if shapes.is_empty() {
        return Err(FloodError::Processing("no shapes in file".to_string()));
    }
    let points: Vec<(f64, f64)> = shapes
        .iter()
        .flat_map(|s| s.points.iter().copied())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();

    let roi = Geometry::from_points(&points, construction)?;
    log::info!("ROI from {} shapes ({} vertices, {:?}): {}", shapes.len(), points.len(), construction, roi);
    Ok(roi)
}

/// Andrew's monotone chain; counter-clockwise, collinear points dropped
fn convex_hull(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }

    let cross = |o: (f64, f64), a: (f64, f64), b: (f64, f64)| (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0);

    let mut lower: Vec<(f64, f64)> = Vec::new();
    for &p in &sorted {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<(f64, f64)> = Vec::new();
    for &p in sorted.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(points: &[(f64, f64)]) -> Shape {
        Shape { kind: "POLYGON".to_string(), points: points.to_vec() }
    }

    #[test]
    fn test_convex_hull_drops_interior_points() {
        let hull = convex_hull(&[(0.0, 0.0), (1.0, 0.0), (0.5, 0.5), (1.0, 1.0), (0.0, 1.0), (0.5, 0.0)]);
        assert_eq!(hull, vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
    }

    #[test]
    fn test_roi_wkt_is_closed() {
        let shapes = [shape(&[(10.0, 45.0), (10.5, 45.0), (10.5, 45.5)]), shape(&[(10.0, 45.5)])];
        let roi = roi_from_shapes(&shapes, RoiConstruction::ConvexHull).unwrap();
        assert_eq!(roi.to_wkt(), "POLYGON ((10 45, 10.5 45, 10.5 45.5, 10 45.5, 10 45))");
        let bbox = roi.bounding_box().unwrap();
        assert_eq!((bbox.min_lon, bbox.max_lat), (10.0, 45.5));
    }

    #[test]
    fn test_point_order_keeps_file_order() {
        let points = [(0.0, 0.0), (1.0, 1.0), (1.0, 0.0), (0.0, 1.0)];
        let bowtie = Geometry::from_points(&points, RoiConstruction::PointOrder).unwrap();
        assert_eq!(bowtie.vertices(), &points);
        let hull = Geometry::from_points(&points, RoiConstruction::ConvexHull).unwrap();
        assert_eq!(hull.vertices().len(), 4);
        assert_ne!(hull.vertices(), &points);
    }

    #[test]
    fn test_empty_and_degenerate_inputs() {
        assert!(roi_from_shapes(&[], RoiConstruction::ConvexHull).is_err());
        let line = [shape(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)])];
        assert!(roi_from_shapes(&line, RoiConstruction::ConvexHull).is_err());
    }
}
