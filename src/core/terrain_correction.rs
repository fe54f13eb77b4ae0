use chrono::Duration;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::core::geocoding::{
    ellipsoid_normal, latlon_to_ecef, meters_to_degrees, GeoPos, Geocoding, PixelPos, TiePointGrid, WGS84_WKT,
};
use crate::core::pipeline::Stage;
use crate::io::dem::{Dem, DemProvider};
use crate::io::orbit::OrbitReader;
use crate::types::{Band, BoundingBox, FloodError, FloodResult, GeoTransform, Product, ProcessingStage, ScalarType};

/// Upper bound on the number of output pixels of one product
const MAX_OUTPUT_PIXELS: usize = 1 << 31;

/// Terrain correction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainCorrectionParams {
    pub dem_name: String,
    /// Output pixel spacing in meters
    pub pixel_spacing: f64,
    pub source_bands: Vec<String>,
}

impl Default for TerrainCorrectionParams {
    fn default() -> Self {
        Self {
            dem_name: "SRTM 3Sec".to_string(),
            pixel_spacing: 10.0,
            source_bands: vec!["Sigma0_VV".to_string()],
        }
    }
}

/// How far an elevated point appears displaced towards near range
enum LookGeometry<'a> {
    /// Already map projected, nothing to displace
    Map,
    /// Incidence angle from the satellite position of each source line
    Orbit { satellite: Vec<[f64; 3]>, range_spacing: f64 },
    /// Incidence angle from the annotated tie-point grid (degrees)
    IncidenceGrid { grid: &'a TiePointGrid, range_spacing: f64 },
}

impl LookGeometry<'_> {
    /// Ground-range shift in pixels of a point at `height` seen at source position `pos`
    fn range_shift(&self, pos: PixelPos, ground: [f64; 3], normal: [f64; 3], height: f64) -> f64 {
        let (incidence, range_spacing) = match self {
            LookGeometry::Map => return 0.0,
            LookGeometry::Orbit { satellite, range_spacing } => {
                let row = (pos.y.floor().max(0.0) as usize).min(satellite.len() - 1);
                let sat = satellite[row];
                let look = [sat[0] - ground[0], sat[1] - ground[1], sat[2] - ground[2]];
                let norm = (look[0] * look[0] + look[1] * look[1] + look[2] * look[2]).sqrt();
                let cos = (look[0] * normal[0] + look[1] * normal[1] + look[2] * normal[2]) / norm;
                (cos.clamp(-1.0, 1.0).acos(), *range_spacing)
            }
            LookGeometry::IncidenceGrid { grid, range_spacing } => {
                (grid.interpolate(pos.x, pos.y).to_radians(), *range_spacing)
            }
        };
        let tan = incidence.tan();
        if tan.abs() < 1e-6 {
            return 0.0;
        }
        height / tan / range_spacing
    }
}

/// Orthorectifies the source bands onto a north-up WGS84 grid using a DEM
pub struct TerrainCorrection {
    params: TerrainCorrectionParams,
    dem: Box<dyn DemProvider>,
}

impl TerrainCorrection {
    pub fn new(params: TerrainCorrectionParams, dem: Box<dyn DemProvider>) -> Self {
        Self { params, dem }
    }

    /// Output grid covering `bounds` at the configured spacing
    fn create_output_grid(&self, bounds: &BoundingBox) -> FloodResult<(usize, usize, GeoTransform)> {
        if !(self.params.pixel_spacing > 0.0) {
            return Err(FloodError::Processing(format!("Invalid pixel spacing {}", self.params.pixel_spacing)));
        }
        let lat_center = (bounds.min_lat + bounds.max_lat) / 2.0;
        let (pixel_size_lat, pixel_size_lon) = meters_to_degrees(self.params.pixel_spacing, lat_center);

        let width = (((bounds.max_lon - bounds.min_lon) / pixel_size_lon).ceil() as usize).max(1);
        let height = (((bounds.max_lat - bounds.min_lat) / pixel_size_lat).ceil() as usize).max(1);
        if width.saturating_mul(height) > MAX_OUTPUT_PIXELS {
            return Err(FloodError::Processing(format!(
                "Output grid of {}x{} pixels is too large",
                width, height
            )));
        }

        let transform = GeoTransform {
            top_left_x: bounds.min_lon,
            pixel_width: pixel_size_lon,
            rotation_x: 0.0,
            top_left_y: bounds.max_lat,
            rotation_y: 0.0,
            pixel_height: -pixel_size_lat,
        };
        Ok((width, height, transform))
    }

    fn look_geometry<'a>(&self, product: &'a Product) -> FloodResult<LookGeometry<'a>> {
        if product.geocoding.is_map_geometry() {
            return Ok(LookGeometry::Map);
        }
        let range_spacing = product.metadata.pixel_spacing.0;
        if !(range_spacing > 0.0) {
            return Err(FloodError::Metadata("Product has no range pixel spacing".to_string()));
        }

        let metadata = &product.metadata;
        if let (Some(orbit), Some(timing)) = (&metadata.orbit_data, &metadata.timing) {
            if !orbit.state_vectors.is_empty() {
                let satellite = (0..product.height.max(1))
                    .map(|row| {
                        let offset_us = ((row as f64 + 0.5) * timing.line_time_interval * 1e6).round() as i64;
                        let time = timing.first_line_time + Duration::microseconds(offset_us);
                        OrbitReader::interpolate_position(orbit, time, 3)
                    })
                    .collect::<FloodResult<Vec<_>>>()?;
                log::debug!("Incidence angles from {} orbit state vectors", orbit.state_vectors.len());
                return Ok(LookGeometry::Orbit { satellite, range_spacing });
            }
        }
        match product.tie_point_grids.get("incident_angle") {
            Some(grid) => {
                log::debug!("Incidence angles from the incident_angle tie-point grid");
                Ok(LookGeometry::IncidenceGrid { grid, range_spacing })
            }
            None => Err(FloodError::Metadata(
                "Product has neither orbit timing nor an incident_angle grid".to_string(),
            )),
        }
    }

    /// Source pixel position (continuous, pixel-centre based) of every output pixel; NaN where unmapped
    fn source_positions(
        &self,
        product: &Product,
        dem: &Dem,
        look: &LookGeometry<'_>,
        grid: (usize, usize, GeoTransform),
    ) -> Array2<(f64, f64)> {
        let (width, height, transform) = grid;
        let mut positions = Array2::from_elem((height, width), (f64::NAN, f64::NAN));

        Zip::indexed(&mut positions).par_for_each(|(row, col), position| {
            let lon = transform.top_left_x + (col as f64 + 0.5) * transform.pixel_width;
            let lat = transform.top_left_y + (row as f64 + 0.5) * transform.pixel_height;

            let Some(elevation) = dem.elevation_at(lat, lon) else {
                return;
            };
            let Some(pixel) = product.geocoding.geo_to_pixel(GeoPos { lat, lon }) else {
                return;
            };
            let shift = look.range_shift(pixel, latlon_to_ecef(lat, lon, 0.0), ellipsoid_normal(lat, lon), elevation);
            *position = (pixel.x - shift, pixel.y);
        });
        positions
    }
}

impl Stage for TerrainCorrection {
    fn kind(&self) -> ProcessingStage {
        ProcessingStage::TerrainCorrection
    }

    fn process(&self, product: &Product) -> FloodResult<Product> {
        log::debug!("Terrain correction parameters: {:?}", self.params);
        let sources = self
            .params
            .source_bands
            .iter()
            .map(|name| product.require_band(name))
            .collect::<FloodResult<Vec<_>>>()?;

        let footprint = product.geocoding.footprint(product.width, product.height)?;
        let grid = self.create_output_grid(&footprint)?;
        let (width, height, transform) = grid;
        log::info!("Terrain correction output grid: {}x{} pixels", width, height);

        let look = self.look_geometry(product)?;
        let dem = self.dem.dem_for(&footprint)?;
        log::debug!("Using {} with {} tiles", self.params.dem_name, dem.tiles().len());

        let positions = self.source_positions(product, &dem, &look, grid);

        let mut output = product.derive_empty(product.name.clone(), width, height);
        output.geocoding = Geocoding::Map { crs_wkt: WGS84_WKT.to_string(), transform };
        output.tie_point_grids.clear();
        output.metadata.pixel_spacing = (self.params.pixel_spacing, self.params.pixel_spacing);

        for source in sources {
            let nodata = source.no_data_value;
            let data = source.data.as_ref();
            let resampled = Zip::from(&positions).par_map_collect(|&(x, y)| bilinear_interpolate(data, x, y, nodata));

            let valid = resampled.iter().filter(|v| v.is_finite()).count();
            log::info!(
                "Terrain corrected {}: {:.1}% coverage",
                source.name,
                valid as f64 / (width * height) as f64 * 100.0
            );

            let mut band = Band::new(source.name.clone(), ScalarType::Float32, resampled).with_no_data(f64::NAN);
            band.unit = source.unit.clone();
            output.add_band(band)?;
        }
        Ok(output)
    }
}

/// Bilinear interpolation at continuous pixel position (`x`, `y`); NaN outside or next to no-data
fn bilinear_interpolate(image: &Array2<f32>, x: f64, y: f64, nodata: Option<f64>) -> f32 {
    let (rows, cols) = image.dim();
    // pixel-centre based index space
    let (fx, fy) = (x - 0.5, y - 0.5);
    if !fx.is_finite() || !fy.is_finite() || fx < -0.5 || fy < -0.5 || fx > cols as f64 - 0.5 || fy > rows as f64 - 0.5 {
        return f32::NAN;
    }
    let fx = fx.clamp(0.0, (cols - 1) as f64);
    let fy = fy.clamp(0.0, (rows - 1) as f64);

    let x1 = fx.floor() as usize;
    let y1 = fy.floor() as usize;
    let x2 = (x1 + 1).min(cols - 1);
    let y2 = (y1 + 1).min(rows - 1);
    let dx = fx - x1 as f64;
    let dy = fy - y1 as f64;

    let corners = [image[[y1, x1]], image[[y1, x2]], image[[y2, x1]], image[[y2, x2]]];
    if corners.iter().any(|&v| !v.is_finite() || nodata.map_or(false, |nd| v as f64 == nd)) {
        return f32::NAN;
    }
    let [v11, v21, v12, v22] = corners.map(|v| v as f64);

    let interpolated = v11 * (1.0 - dx) * (1.0 - dy) + v21 * dx * (1.0 - dy) + v12 * (1.0 - dx) * dy + v22 * dx * dy;
    interpolated as f32
}
