use chrono::Duration;
use ndarray::s;
use serde::{Deserialize, Serialize};

use crate::core::geocoding::GeoPos;
use crate::core::geometry::Geometry;
use crate::core::pipeline::Stage;
use crate::types::{Band, FloodError, FloodResult, Product, ProcessingStage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsetParams {
    /// Carry the free-form source metadata into the subset
    pub copy_metadata: bool,
}

impl Default for SubsetParams {
    fn default() -> Self {
        Self { copy_metadata: true }
    }
}

/// Pixel window `[x0, x1) x [y0, y1)` of a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRegion {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl PixelRegion {
    pub fn width(&self) -> usize {
        self.x1 - self.x0
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0
    }
}

/// Crops a product to the pixels whose centres fall inside the region of interest's extent
pub struct Subset {
    params: SubsetParams,
    roi: Geometry,
}

impl Subset {
    pub fn new(params: SubsetParams, roi: Geometry) -> Self {
        Self { params, roi }
    }

    /// Pixel window covered by the ROI's bounding box in pixel space
    pub fn pixel_region(&self, product: &Product) -> FloodResult<PixelRegion> {
        let corners: Vec<(f64, f64)> = self
            .roi
            .vertices()
            .iter()
            .filter_map(|&(lon, lat)| product.geocoding.geo_to_pixel(GeoPos { lat, lon }))
            .map(|p| (p.x, p.y))
            .collect();
        if corners.len() < self.roi.vertices().len() {
            log::warn!(
                "{} of {} ROI vertices could not be located in '{}'",
                self.roi.vertices().len() - corners.len(),
                self.roi.vertices().len(),
                product.name
            );
        }

        let no_overlap = || FloodError::Processing(format!("region of interest does not overlap '{}'", product.name));
        let (min_x, max_x, min_y, max_y) = corners.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
            |(x0, x1, y0, y1), &(x, y)| (x0.min(x), x1.max(x), y0.min(y), y1.max(y)),
        );
        if !min_x.is_finite() || !max_x.is_finite() || !min_y.is_finite() || !max_y.is_finite() {
            return Err(no_overlap());
        }

        // first and one-past-last pixel whose centre lies in [min, max]
        let first = |min: f64| (min - 0.5).ceil().max(0.0);
        let end = |max: f64, size: usize| ((max - 0.5).floor() + 1.0).min(size as f64);
        let (x0, x1) = (first(min_x), end(max_x, product.width));
        let (y0, y1) = (first(min_y), end(max_y, product.height));
        if x1 <= x0 || y1 <= y0 {
            return Err(no_overlap());
        }

        Ok(PixelRegion { x0: x0 as usize, y0: y0 as usize, x1: x1 as usize, y1: y1 as usize })
    }
}

impl Stage for Subset {
    fn kind(&self) -> ProcessingStage {
        ProcessingStage::SpatialSubset
    }

    fn process(&self, product: &Product) -> FloodResult<Product> {
        log::debug!("Subset parameters: {:?}, region {}", self.params, self.roi);
        let region = self.pixel_region(product)?;
        log::info!(
            "Subset region x {}..{}, y {}..{} of {}x{}",
            region.x0,
            region.x1,
            region.y0,
            region.y1,
            product.width,
            product.height
        );

        let mut output = product.derive_empty(format!("subset_0_of_{}", product.name), region.width(), region.height());
        output.geocoding = product.geocoding.subset(region.x0, region.y0);
        output.tie_point_grids = product
            .tie_point_grids
            .iter()
            .map(|(name, grid)| (name.clone(), grid.shifted(region.x0 as f64, region.y0 as f64)))
            .collect();

        let metadata = &mut output.metadata;
        metadata.subset_offset = (
            metadata.subset_offset.0 + region.x0,
            metadata.subset_offset.1 + region.y0,
        );
        if let Some(timing) = metadata.timing.as_mut() {
            let offset_us = (region.y0 as f64 * timing.line_time_interval * 1e6).round() as i64;
            timing.first_line_time = timing.first_line_time + Duration::microseconds(offset_us);
        }
        if !self.params.copy_metadata {
            metadata.annotations.clear();
        }

        for band in product.bands() {
            let data = band.data.slice(s![region.y0..region.y1, region.x0..region.x1]).to_owned();
            let mut cropped = Band::new(band.name.clone(), band.data_type, data);
            cropped.no_data_value = band.no_data_value;
            cropped.unit = band.unit.clone();
            output.add_band(cropped)?;
        }
        Ok(output)
    }
}
