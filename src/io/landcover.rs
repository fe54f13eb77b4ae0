use gdal::Dataset;
use ndarray::{Array2, Zip};
use std::path::PathBuf;

use crate::types::{Band, BoundingBox, FloodError, FloodResult, GeoTransform, Product, ScalarType};

/// GlobCover class written where the map has no data
pub const GLOBCOVER_NO_DATA: f64 = 230.0;

/// Land-cover classes of an area on a north-up lat/lon grid
#[derive(Debug, Clone)]
pub struct LandCoverMap {
    pub data: Array2<f32>,
    pub transform: GeoTransform,
    pub nodata: Option<f32>,
}

impl LandCoverMap {
    /// Class of the cell containing (`lat`, `lon`)
    pub fn class_at(&self, lat: f64, lon: f64) -> Option<f32> {
        let (rows, cols) = self.data.dim();
        let col = ((lon - self.transform.top_left_x) / self.transform.pixel_width).floor();
        let row = ((lat - self.transform.top_left_y) / self.transform.pixel_height).floor();
        if col < 0.0 || row < 0.0 || col >= cols as f64 || row >= rows as f64 {
            return None;
        }
        let value = self.data[[row as usize, col as usize]];
        if !value.is_finite() || Some(value) == self.nodata {
            return None;
        }
        Some(value)
    }
}

/// Source of land-cover maps by name
pub trait LandCoverProvider {
    fn land_cover(&self, source_name: &str, bbox: &BoundingBox) -> FloodResult<LandCoverMap>;
}

/// Local GlobCover GeoTIFF in geographic coordinates
#[derive(Debug, Clone)]
pub struct GlobCoverRaster {
    path: PathBuf,
}

impl GlobCoverRaster {
    pub const NAME: &'static str = "GlobCover";

    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl LandCoverProvider for GlobCoverRaster {
    fn land_cover(&self, source_name: &str, bbox: &BoundingBox) -> FloodResult<LandCoverMap> {
        if !source_name.eq_ignore_ascii_case(Self::NAME) {
            return Err(FloodError::InvalidFormat(format!("unknown land cover map '{}'", source_name)));
        }
        if !self.path.is_file() {
            return Err(FloodError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", self.path.display()),
            )));
        }

        let dataset = Dataset::open(&self.path)?;
        let full = GeoTransform::from_gdal(dataset.geo_transform()?);
        let (width, height) = dataset.raster_size();

        // window of cells touching the bounding box
        let col = |lon: f64| (lon - full.top_left_x) / full.pixel_width;
        let row = |lat: f64| (lat - full.top_left_y) / full.pixel_height;
        let (c0, c1) = (col(bbox.min_lon).min(col(bbox.max_lon)), col(bbox.min_lon).max(col(bbox.max_lon)));
        let (r0, r1) = (row(bbox.min_lat).min(row(bbox.max_lat)), row(bbox.min_lat).max(row(bbox.max_lat)));
        let x0 = c0.floor().clamp(0.0, width as f64) as usize;
        let x1 = (c1.floor() + 1.0).clamp(0.0, width as f64) as usize;
        let y0 = r0.floor().clamp(0.0, height as f64) as usize;
        let y1 = (r1.floor() + 1.0).clamp(0.0, height as f64) as usize;
        if x1 <= x0 || y1 <= y0 {
            return Err(FloodError::Processing(format!("{} does not cover {:?}", self.path.display(), bbox)));
        }

        let (w, h) = (x1 - x0, y1 - y0);
        let rasterband = dataset.rasterband(1)?;
        let nodata = rasterband.no_data_value().map(|v| v as f32);
        let buffer = rasterband.read_as::<f32>((x0 as isize, y0 as isize), (w, h), (w, h), None)?;
        let data = Array2::from_shape_vec((h, w), buffer.data)
            .map_err(|e| FloodError::InvalidFormat(format!("Failed to reshape land cover: {}", e)))?;

        log::debug!("Read {}x{} land cover cells from {}", w, h, self.path.display());
        Ok(LandCoverMap {
            data,
            transform: GeoTransform {
                top_left_x: full.top_left_x + x0 as f64 * full.pixel_width,
                top_left_y: full.top_left_y + y0 as f64 * full.pixel_height,
                ..full
            },
            nodata,
        })
    }
}

/// Copy of `product` with a `land_cover_<source_name>` band sampled at every pixel centre
pub fn add_land_cover(product: &Product, source_name: &str, provider: &dyn LandCoverProvider) -> FloodResult<Product> {
    let unavailable = |reason: String| FloodError::LandCoverUnavailable { source_name: source_name.to_string(), reason };

    let bbox = product
        .geocoding
        .footprint(product.width, product.height)
        .map_err(|e| unavailable(e.to_string()))?;
    let map = provider.land_cover(source_name, &bbox).map_err(|e| unavailable(e.to_string()))?;
    log::info!("Adding land cover '{}' to '{}'", source_name, product.name);

    let geocoding = &product.geocoding;
    let mut classes = Array2::<f32>::zeros((product.height, product.width));
    Zip::indexed(&mut classes).par_for_each(|(row, col), class| {
        let pos = geocoding.pixel_center(col, row);
        *class = map.class_at(pos.lat, pos.lon).unwrap_or(GLOBCOVER_NO_DATA as f32);
    });

    let band = Band::new(format!("land_cover_{}", source_name), ScalarType::Uint8, classes).with_no_data(GLOBCOVER_NO_DATA);
    let mut output = product.clone();
    output.set_band(band)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geocoding::Geocoding;
    use crate::types::SarMetadata;

    fn map() -> LandCoverMap {
        // 2x2 cells of 0.5°, water in the north-west cell
        LandCoverMap {
            data: Array2::from_shape_vec((2, 2), vec![210.0, 40.0, 40.0, 230.0]).unwrap(),
            transform: GeoTransform::from_gdal([10.0, 0.5, 0.0, 46.0, 0.0, -0.5]),
            nodata: Some(230.0),
        }
    }

    struct Fixed;

    impl LandCoverProvider for Fixed {
        fn land_cover(&self, _: &str, _: &BoundingBox) -> FloodResult<LandCoverMap> {
            Ok(map())
        }
    }

    #[test]
    fn test_nearest_cell_lookup() {
        let map = map();
        assert_eq!(map.class_at(45.9, 10.1), Some(210.0));
        assert_eq!(map.class_at(45.9, 10.6), Some(40.0));
        assert_eq!(map.class_at(45.1, 10.9), None);
        assert_eq!(map.class_at(44.0, 10.1), None);
    }

    #[test]
    fn test_band_added_with_source_name() {
        let product = Product::new("p", 4, 4, Geocoding::geographic(10.0, 46.0, 0.25), SarMetadata::default());
        let out = add_land_cover(&product, "GlobCover", &Fixed).unwrap();
        let band = out.band("land_cover_GlobCover").unwrap();
        assert_eq!(band.data_type, ScalarType::Uint8);
        assert_eq!(band.data[[0, 0]], 210.0);
        assert_eq!(band.data[[0, 3]], 40.0);
        assert_eq!(band.data[[3, 3]], 230.0);
        assert!(product.band_names().is_empty());
    }

    #[test]
    fn test_missing_raster_is_unavailable() {
        let product = Product::new("p", 2, 2, Geocoding::geographic(10.0, 46.0, 0.25), SarMetadata::default());
        let provider = GlobCoverRaster::new("/nonexistent/globcover.tif");
        let err = add_land_cover(&product, "GlobCover", &provider).unwrap_err();
        assert!(matches!(err, FloodError::LandCoverUnavailable { .. }));
    }
}
