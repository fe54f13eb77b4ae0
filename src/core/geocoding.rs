//! Pixel <-> geographic position mapping for radar and map geometry products.
//!
//! Pixel coordinates are continuous: pixel `(col, row)` covers
//! `[col, col + 1) x [row, row + 1)` and its centre is at `(col + 0.5, row + 0.5)`.

use ndarray::Array2;

use crate::types::{BoundingBox, FloodError, FloodResult, GeoTransform};

/// WGS84 geographic CRS used for every map-geometry product
pub const WGS84_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]]"#;

const WGS84_A: f64 = 6_378_137.0; // WGS84 semi-major axis
const WGS84_E2: f64 = 0.00669437999014; // WGS84 first eccentricity squared
const METERS_PER_DEGREE: f64 = 111_320.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPos {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPos {
    pub x: f64,
    pub y: f64,
}

/// Sparse grid of values sampled at (possibly irregular) pixel positions,
/// bilinearly interpolated in between and linearly extrapolated outside.
#[derive(Debug, Clone)]
pub struct TiePointGrid {
    x_coords: Vec<f64>,
    y_coords: Vec<f64>,
    values: Array2<f32>,
}

impl TiePointGrid {
    /// `values[[r, c]]` is the value at pixel position `(x_coords[c], y_coords[r])`
    pub fn new(x_coords: Vec<f64>, y_coords: Vec<f64>, values: Array2<f32>) -> FloodResult<Self> {
        if values.dim() != (y_coords.len(), x_coords.len()) || x_coords.is_empty() || y_coords.is_empty() {
            return Err(FloodError::Metadata(format!(
                "Tie-point grid shape {:?} does not match {} x {} coordinates",
                values.dim(),
                y_coords.len(),
                x_coords.len()
            )));
        }
        let increasing = |c: &[f64]| c.windows(2).all(|w| w[1] > w[0]);
        if !increasing(&x_coords) || !increasing(&y_coords) {
            return Err(FloodError::Metadata(
                "Tie-point coordinates must be strictly increasing".to_string(),
            ));
        }
        Ok(Self { x_coords, y_coords, values })
    }

    /// Grid with nodes every `step` pixels starting at the pixel centre of (0, 0)
    pub fn regular(values: Array2<f32>, step_x: f64, step_y: f64) -> FloodResult<Self> {
        let (rows, cols) = values.dim();
        let x_coords = (0..cols).map(|c| 0.5 + c as f64 * step_x).collect();
        let y_coords = (0..rows).map(|r| 0.5 + r as f64 * step_y).collect();
        Self::new(x_coords, y_coords, values)
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// Same grid expressed relative to a raster whose origin is `(dx, dy)` here
    pub fn shifted(&self, dx: f64, dy: f64) -> Self {
        Self {
            x_coords: self.x_coords.iter().map(|x| x - dx).collect(),
            y_coords: self.y_coords.iter().map(|y| y - dy).collect(),
            values: self.values.clone(),
        }
    }

    fn locate(coords: &[f64], v: f64) -> (usize, usize, f64) {
        if coords.len() == 1 {
            return (0, 0, 0.0);
        }
        let upper = coords.partition_point(|&c| c <= v);
        let i0 = upper.saturating_sub(1).min(coords.len() - 2);
        let i1 = i0 + 1;
        let t = (v - coords[i0]) / (coords[i1] - coords[i0]);
        (i0, i1, t)
    }

    pub fn interpolate(&self, x: f64, y: f64) -> f64 {
        let (c0, c1, tx) = Self::locate(&self.x_coords, x);
        let (r0, r1, ty) = Self::locate(&self.y_coords, y);

        let v00 = self.values[[r0, c0]] as f64;
        let v01 = self.values[[r0, c1]] as f64;
        let v10 = self.values[[r1, c0]] as f64;
        let v11 = self.values[[r1, c1]] as f64;

        let top = v00 + tx * (v01 - v00);
        let bottom = v10 + tx * (v11 - v10);
        top + ty * (bottom - top)
    }

    /// Nearest grid node to a target as measured by `distance(value_at_node)`
    fn nearest_node<F: Fn(usize, usize) -> f64>(&self, distance: F) -> PixelPos {
        let mut best = (f64::INFINITY, self.x_coords[0], self.y_coords[0]);
        for (r, &y) in self.y_coords.iter().enumerate() {
            for (c, &x) in self.x_coords.iter().enumerate() {
                let d = distance(r, c);
                if d < best.0 {
                    best = (d, x, y);
                }
            }
        }
        PixelPos { x: best.1, y: best.2 }
    }
}

/// How raster pixels map onto the earth
#[derive(Debug, Clone)]
pub enum Geocoding {
    /// Radar geometry located through latitude/longitude tie-point grids
    TiePoint {
        latitude: TiePointGrid,
        longitude: TiePointGrid,
    },
    /// North-up geographic (lat/lon) grid
    Map {
        crs_wkt: String,
        transform: GeoTransform,
    },
}

impl Geocoding {
    /// WGS84 grid whose top-left corner is at (`lon`, `lat`) with square pixels of `spacing_deg`
    pub fn geographic(lon: f64, lat: f64, spacing_deg: f64) -> Self {
        Geocoding::Map {
            crs_wkt: WGS84_WKT.to_string(),
            transform: GeoTransform {
                top_left_x: lon,
                pixel_width: spacing_deg,
                rotation_x: 0.0,
                top_left_y: lat,
                rotation_y: 0.0,
                pixel_height: -spacing_deg,
            },
        }
    }

    pub fn is_map_geometry(&self) -> bool {
        matches!(self, Geocoding::Map { .. })
    }

    pub fn pixel_to_geo(&self, pos: PixelPos) -> GeoPos {
        match self {
            Geocoding::TiePoint { latitude, longitude } => GeoPos {
                lat: latitude.interpolate(pos.x, pos.y),
                lon: longitude.interpolate(pos.x, pos.y),
            },
            Geocoding::Map { transform, .. } => GeoPos {
                lon: transform.top_left_x + pos.x * transform.pixel_width + pos.y * transform.rotation_x,
                lat: transform.top_left_y + pos.x * transform.rotation_y + pos.y * transform.pixel_height,
            },
        }
    }

    /// Geographic position of the centre of pixel (`col`, `row`)
    pub fn pixel_center(&self, col: usize, row: usize) -> GeoPos {
        self.pixel_to_geo(PixelPos { x: col as f64 + 0.5, y: row as f64 + 0.5 })
    }

    /// Inverse mapping; `None` when the position cannot be resolved
    pub fn geo_to_pixel(&self, pos: GeoPos) -> Option<PixelPos> {
        match self {
            Geocoding::TiePoint { latitude, longitude } => invert_tie_points(latitude, longitude, pos),
            Geocoding::Map { transform, .. } => {
                let det = transform.pixel_width * transform.pixel_height
                    - transform.rotation_x * transform.rotation_y;
                if det.abs() < f64::EPSILON * 1e-6 {
                    return None;
                }
                let dx = pos.lon - transform.top_left_x;
                let dy = pos.lat - transform.top_left_y;
                Some(PixelPos {
                    x: (dx * transform.pixel_height - dy * transform.rotation_x) / det,
                    y: (dy * transform.pixel_width - dx * transform.rotation_y) / det,
                })
            }
        }
    }

    /// Geocoding of a sub-raster whose top-left pixel is (`x0`, `y0`) here
    pub fn subset(&self, x0: usize, y0: usize) -> Self {
        match self {
            Geocoding::TiePoint { latitude, longitude } => Geocoding::TiePoint {
                latitude: latitude.shifted(x0 as f64, y0 as f64),
                longitude: longitude.shifted(x0 as f64, y0 as f64),
            },
            Geocoding::Map { crs_wkt, transform } => {
                let origin = self.pixel_to_geo(PixelPos { x: x0 as f64, y: y0 as f64 });
                Geocoding::Map {
                    crs_wkt: crs_wkt.clone(),
                    transform: GeoTransform {
                        top_left_x: origin.lon,
                        top_left_y: origin.lat,
                        ..*transform
                    },
                }
            }
        }
    }

    /// Lat/lon bounding box of a `width` x `height` raster, sampled along its border
    pub fn footprint(&self, width: usize, height: usize) -> FloodResult<BoundingBox> {
        let samples = 16;
        let mut points = Vec::with_capacity(4 * (samples + 1));
        for k in 0..=samples {
            let fx = width as f64 * k as f64 / samples as f64;
            let fy = height as f64 * k as f64 / samples as f64;
            for pos in [
                PixelPos { x: fx, y: 0.0 },
                PixelPos { x: fx, y: height as f64 },
                PixelPos { x: 0.0, y: fy },
                PixelPos { x: width as f64, y: fy },
            ] {
                let geo = self.pixel_to_geo(pos);
                points.push((geo.lon, geo.lat));
            }
        }
        BoundingBox::from_points(points)
            .ok_or_else(|| FloodError::Metadata("Geocoding yields no valid footprint".to_string()))
    }
}

fn invert_tie_points(latitude: &TiePointGrid, longitude: &TiePointGrid, target: GeoPos) -> Option<PixelPos> {
    let start = latitude.nearest_node(|r, c| {
        let dlat = latitude.values[[r, c]] as f64 - target.lat;
        let dlon = longitude.values[[r, c]] as f64 - target.lon;
        dlat * dlat + dlon * dlon
    });

    let (mut x, mut y) = (start.x, start.y);
    let h = 0.5;

    for _ in 0..30 {
        let f_lat = latitude.interpolate(x, y) - target.lat;
        let f_lon = longitude.interpolate(x, y) - target.lon;
        if f_lat.abs() < 1e-11 && f_lon.abs() < 1e-11 {
            break;
        }

        // Jacobian by central differences
        let a = (latitude.interpolate(x + h, y) - latitude.interpolate(x - h, y)) / (2.0 * h);
        let b = (latitude.interpolate(x, y + h) - latitude.interpolate(x, y - h)) / (2.0 * h);
        let c = (longitude.interpolate(x + h, y) - longitude.interpolate(x - h, y)) / (2.0 * h);
        let d = (longitude.interpolate(x, y + h) - longitude.interpolate(x, y - h)) / (2.0 * h);

        let det = a * d - b * c;
        if det.abs() < 1e-24 {
            return None;
        }

        x -= (f_lat * d - b * f_lon) / det;
        y -= (a * f_lon - c * f_lat) / det;
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
    }

    let residual = (latitude.interpolate(x, y) - target.lat)
        .abs()
        .max((longitude.interpolate(x, y) - target.lon).abs());
    if residual < 1e-6 {
        Some(PixelPos { x, y })
    } else {
        log::debug!("Tie-point inversion did not converge for {:?} (residual {:.2e})", target, residual);
        None
    }
}

/// Convert lat/lon/elevation to ECEF coordinates
pub fn latlon_to_ecef(lat: f64, lon: f64, elevation: f64) -> [f64; 3] {
    let lat_rad = lat.to_radians();
    let lon_rad = lon.to_radians();

    let n = WGS84_A / (1.0 - WGS84_E2 * lat_rad.sin().powi(2)).sqrt();

    let x = (n + elevation) * lat_rad.cos() * lon_rad.cos();
    let y = (n + elevation) * lat_rad.cos() * lon_rad.sin();
    let z = (n * (1.0 - WGS84_E2) + elevation) * lat_rad.sin();

    [x, y, z]
}

/// Outward unit normal of the WGS84 ellipsoid at a geodetic position
pub fn ellipsoid_normal(lat: f64, lon: f64) -> [f64; 3] {
    let lat_rad = lat.to_radians();
    let lon_rad = lon.to_radians();
    [
        lat_rad.cos() * lon_rad.cos(),
        lat_rad.cos() * lon_rad.sin(),
        lat_rad.sin(),
    ]
}

/// Degrees of latitude and longitude spanned by `meters` around `lat`
pub fn meters_to_degrees(meters: f64, lat: f64) -> (f64, f64) {
    let lat_deg = meters / METERS_PER_DEGREE;
    let lon_deg = meters / (METERS_PER_DEGREE * lat.to_radians().cos().max(1e-6));
    (lat_deg, lon_deg)
}
