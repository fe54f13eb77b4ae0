//! Shared fixtures: synthetic products and in-memory auxiliary data sources
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use ndarray::Array2;

use sarflood::core::geocoding::Geocoding;
use sarflood::io::dem::{Dem, DemProvider, DemTile};
use sarflood::io::landcover::{LandCoverMap, LandCoverProvider};
use sarflood::io::orbit::{OrbitProvider, OrbitType};
use sarflood::types::{BoundingBox, FloodError, GeoTransform, OrbitData, StateVector};
use sarflood::{Band, FloodResult, Product, SarMetadata, ScalarType};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn acquisition_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 7, 15, 5, 30, 0).unwrap()
}

/// Geographic product of `width` x `height` pixels of 0.001° at (10°E, 45°N)
/// carrying a constant `Intensity_VV` band
pub fn intensity_product(width: usize, height: usize, intensity: f32) -> Product {
    let metadata = SarMetadata {
        product_id: "S1A_IW_GRDH_1SDV_20210715T053000_20210715T053025_038777_0493F1_1A2B".to_string(),
        mission: "SENTINEL-1A".to_string(),
        start_time: Some(acquisition_start()),
        stop_time: Some(acquisition_start() + Duration::seconds(25)),
        pixel_spacing: (10.0, 10.0),
        ..Default::default()
    };
    let mut product = Product::new("S1A_test", width, height, Geocoding::geographic(10.0, 45.0, 0.001), metadata);
    product
        .add_band(Band::new("Intensity_VV", ScalarType::Float32, Array2::from_elem((height, width), intensity)))
        .unwrap();
    product
}

/// Straight-line orbit sampled every 10 s around the requested window
pub struct SyntheticOrbit;

impl OrbitProvider for SyntheticOrbit {
    fn orbit_for(&self, _: &str, _: OrbitType, start: DateTime<Utc>, _: DateTime<Utc>) -> FloodResult<OrbitData> {
        let state_vectors: Vec<StateVector> = (-12..12)
            .map(|k| StateVector {
                time: start + Duration::seconds(k * 10),
                position: [4.5e6 + 7000.0 * k as f64 * 10.0, 8.0e5, 5.0e6],
                velocity: [7000.0, 0.0, 0.0],
            })
            .collect();
        Ok(OrbitData { reference_time: state_vectors[0].time, state_vectors })
    }
}

/// Orbit source that never has a file
pub struct NoOrbit;

impl OrbitProvider for NoOrbit {
    fn orbit_for(&self, mission: &str, _: OrbitType, _: DateTime<Utc>, _: DateTime<Utc>) -> FloodResult<OrbitData> {
        Err(FloodError::Orbit(format!("no orbit for {}", mission)))
    }
}

/// Constant-height DEM covering any requested area with a margin
pub struct FlatDem(pub f32);

impl DemProvider for FlatDem {
    fn dem_for(&self, bbox: &BoundingBox) -> FloodResult<Dem> {
        let spacing = 0.01;
        let transform = GeoTransform::from_gdal([bbox.min_lon - 0.1, spacing, 0.0, bbox.max_lat + 0.1, 0.0, -spacing]);
        let rows = ((bbox.max_lat - bbox.min_lat + 0.2) / spacing).ceil() as usize + 1;
        let cols = ((bbox.max_lon - bbox.min_lon + 0.2) / spacing).ceil() as usize + 1;
        Ok(Dem::new(vec![DemTile { data: Array2::from_elem((rows, cols), self.0), transform, nodata: None }]))
    }
}

/// Land cover of a single class over the requested area
pub struct UniformLandCover(pub f32);

impl LandCoverProvider for UniformLandCover {
    fn land_cover(&self, _: &str, bbox: &BoundingBox) -> FloodResult<LandCoverMap> {
        Ok(LandCoverMap {
            data: Array2::from_elem((4, 4), self.0),
            transform: GeoTransform::from_gdal([
                bbox.min_lon - 0.01,
                (bbox.max_lon - bbox.min_lon + 0.02) / 4.0,
                0.0,
                bbox.max_lat + 0.01,
                0.0,
                -(bbox.max_lat - bbox.min_lat + 0.02) / 4.0,
            ]),
            nodata: Some(230.0),
        })
    }
}

/// Land-cover source that is never reachable
pub struct OfflineLandCover;

impl LandCoverProvider for OfflineLandCover {
    fn land_cover(&self, source_name: &str, _: &BoundingBox) -> FloodResult<LandCoverMap> {
        Err(FloodError::Processing(format!("{} server unreachable", source_name)))
    }
}
