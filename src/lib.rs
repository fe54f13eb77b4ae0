//! sarflood: Sentinel-1 flood mapping
//!
//! Preprocesses a Sentinel-1 GRD product (orbit correction, subset, calibration,
//! speckle filtering, terrain correction) and derives a binary flood mask that
//! excludes permanent water known from a land-cover map.

use std::sync::Once;

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use config::DataSources;
pub use core::{
    apply_band_maths, load_roi, BandDescriptor, FloodMaskOrchestrator, FloodMaskParams, Geometry,
    RadiometricPipeline, RoiConstruction, Stage,
};
pub use io::{read_product, write_product};
pub use types::{Band, FloodError, FloodResult, Polarization, ProcessingStage, Product, SarMetadata, ScalarType};

static INIT: Once = Once::new();

/// Register the GDAL raster and vector drivers. Safe to call any number of times.
pub fn init() {
    INIT.call_once(|| {
        gdal::DriverManager::register_all();
        log::debug!("Registered {} GDAL drivers", gdal::DriverManager::count());
    });
}
