use gdal::vector::{Geometry as OgrGeometry, LayerAccess};
use gdal::Dataset;
use std::path::Path;

use crate::types::{FloodError, FloodResult};

/// One shapefile record reduced to its vertices
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    /// OGR geometry name, e.g. `POLYGON`
    pub kind: String,
    /// Vertices as (x, y), i.e. (lon, lat) for geographic shapefiles
    pub points: Vec<(f64, f64)>,
}

/// Read every shape record of a vector file through OGR
pub fn read_shapes<P: AsRef<Path>>(path: P) -> FloodResult<Vec<Shape>> {
    let path = path.as_ref();
    let read_error = |reason: String| FloodError::GeometryRead { path: path.to_path_buf(), reason };

    if !path.exists() {
        return Err(read_error("file does not exist".to_string()));
    }
    let dataset = Dataset::open(path).map_err(|e| read_error(e.to_string()))?;

    let mut shapes = Vec::new();
    for index in 0..dataset.layer_count() {
        let mut layer = dataset.layer(index).map_err(|e| read_error(e.to_string()))?;
        for feature in layer.features() {
            let Some(geometry) = feature.geometry() else {
                continue;
            };
            let mut points = Vec::new();
            collect_points(geometry, &mut points);
            shapes.push(Shape { kind: geometry.geometry_name(), points });
        }
    }

    log::debug!("Read {} shapes from {}", shapes.len(), path.display());
    Ok(shapes)
}

fn collect_points(geometry: &OgrGeometry, points: &mut Vec<(f64, f64)>) {
    let parts = geometry.geometry_count();
    if parts == 0 {
        points.extend(geometry.get_point_vec().into_iter().map(|(x, y, _)| (x, y)));
        return;
    }
    for i in 0..parts {
        collect_points(&geometry.get_geometry(i), points);
    }
}
