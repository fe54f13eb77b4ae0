//! Flood mask derivation from a preprocessed Sigma0 product.
//!
//! Low backscatter marks open water. Pixels that the land-cover map already
//! classifies as permanent water are removed, leaving the flooded area.

use serde::{Deserialize, Serialize};

use crate::core::band_maths::{apply_band_maths, BandDescriptor};
use crate::io::landcover::{add_land_cover, LandCoverProvider};
use crate::types::{FloodResult, Product, ScalarType};

pub const FLOODED_BAND: &str = "flooded";
pub const BINARY_WATER_BAND: &str = "BinaryWater";
pub const FLOOD_MASK_BAND: &str = "Sigma0_VV_Flood_Masked";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodMaskParams {
    pub source_band: String,
    /// Linear Sigma0 below which a pixel counts as water
    pub threshold: f64,
    pub land_cover_name: String,
    /// Land-cover class of permanent water bodies
    pub water_class: u8,
}

impl Default for FloodMaskParams {
    fn default() -> Self {
        Self {
            source_band: "Sigma0_VV".to_string(),
            threshold: 1.13e-2,
            land_cover_name: "GlobCover".to_string(),
            water_class: 210,
        }
    }
}

/// Progress of a flood mask derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FloodMaskState {
    Preprocessed,
    ThresholdDerived,
    LandCoverFetched,
    WaterMaskDerived,
    FloodMaskCombined,
}

impl FloodMaskParams {
    pub fn land_cover_band(&self) -> String {
        format!("land_cover_{}", self.land_cover_name)
    }
}

pub struct FloodMaskOrchestrator {
    params: FloodMaskParams,
    land_cover: Box<dyn LandCoverProvider>,
}

impl FloodMaskOrchestrator {
    pub fn new(params: FloodMaskParams, land_cover: Box<dyn LandCoverProvider>) -> Self {
        Self { params, land_cover }
    }

    pub fn params(&self) -> &FloodMaskParams {
        &self.params
    }

    /// `flooded = 1` where the source band is below the threshold
    pub fn derive_threshold(&self, preprocessed: &Product) -> FloodResult<Product> {
        let expression = format!("({} < {}) ? 1 : 0", self.params.source_band, self.params.threshold);
        apply_band_maths(preprocessed, &[BandDescriptor::new(FLOODED_BAND, ScalarType::Uint8, expression)])
    }

    pub fn fetch_land_cover(&self, product: &Product) -> FloodResult<Product> {
        add_land_cover(product, &self.params.land_cover_name, self.land_cover.as_ref())
    }

    /// `BinaryWater = 0` on permanent water, 1 elsewhere
    pub fn derive_water_mask(&self, with_land_cover: &Product) -> FloodResult<Product> {
        let expression = format!("({} == {}) ? 0 : 1", self.params.land_cover_band(), self.params.water_class);
        apply_band_maths(with_land_cover, &[BandDescriptor::new(BINARY_WATER_BAND, ScalarType::Uint8, expression)])
    }

    /// Bring `flooded` over from the thresholded product when missing, then combine both masks
    pub fn combine(&self, water_mask: &Product, thresholded: &Product) -> FloodResult<Product> {
        let mut merged = water_mask.clone();
        let flooded = thresholded.require_band(FLOODED_BAND)?;
        merged.add_band_if_absent(flooded)?;

        let expression = format!("({} == 1 && {} == 1) ? 1 : 0", BINARY_WATER_BAND, FLOODED_BAND);
        apply_band_maths(&merged, &[BandDescriptor::new(FLOOD_MASK_BAND, ScalarType::Uint8, expression)])
    }

    pub fn run(&self, preprocessed: &Product) -> FloodResult<Product> {
        self.run_with(preprocessed, |_, _| {})
    }

    /// Run every step, handing each intermediate product to `observe`
    pub fn run_with<F>(&self, preprocessed: &Product, mut observe: F) -> FloodResult<Product>
    where
        F: FnMut(FloodMaskState, &Product),
    {
        log::debug!("Flood mask parameters: {:?}", self.params);
        observe(FloodMaskState::Preprocessed, preprocessed);

        let thresholded = self.derive_threshold(preprocessed)?;
        observe(FloodMaskState::ThresholdDerived, &thresholded);

        let with_land_cover = self.fetch_land_cover(&thresholded)?;
        observe(FloodMaskState::LandCoverFetched, &with_land_cover);

        let water_mask = self.derive_water_mask(&with_land_cover)?;
        observe(FloodMaskState::WaterMaskDerived, &water_mask);

        let combined = self.combine(&water_mask, &thresholded)?;
        observe(FloodMaskState::FloodMaskCombined, &combined);

        if let Some(mask) = combined.band(FLOOD_MASK_BAND) {
            let flooded = mask.data.iter().filter(|&&v| v == 1.0).count();
            log::info!(
                "Flood mask: {} of {} pixels flooded ({:.2}%)",
                flooded,
                mask.data.len(),
                flooded as f64 / mask.data.len().max(1) as f64 * 100.0
            );
        }
        Ok(combined)
    }
}
