use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::band_maths::ExpressionError;
use crate::core::calibrate::CalibrationCoefficients;
use crate::core::geocoding::{Geocoding, TiePointGrid};

/// Real-valued raster data (rows x columns)
pub type RasterData = Array2<f32>;

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl std::str::FromStr for Polarization {
    type Err = FloodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            other => Err(FloodError::Metadata(format!("Invalid polarization: {}", other))),
        }
    }
}

impl Polarization {
    /// Find the polarization tag embedded in a Sentinel-1 file name (`-vv-`)
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_lowercase();
        if lower.contains("-vv-") {
            Some(Polarization::VV)
        } else if lower.contains("-vh-") {
            Some(Polarization::VH)
        } else if lower.contains("-hv-") {
            Some(Polarization::HV)
        } else if lower.contains("-hh-") {
            Some(Polarization::HH)
        } else {
            None
        }
    }
}

/// Orbit state vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    pub time: DateTime<Utc>,
    pub position: [f64; 3],  // [x, y, z] in meters
    pub velocity: [f64; 3],  // [vx, vy, vz] in m/s
}

/// Orbit information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbitData {
    pub state_vectors: Vec<StateVector>,
    pub reference_time: DateTime<Utc>,
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Smallest box enclosing all `(lon, lat)` points
    pub fn from_points<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<Self> {
        let mut bbox: Option<BoundingBox> = None;
        for (lon, lat) in points {
            if !lon.is_finite() || !lat.is_finite() {
                continue;
            }
            bbox = Some(match bbox {
                None => BoundingBox { min_lon: lon, max_lon: lon, min_lat: lat, max_lat: lat },
                Some(b) => BoundingBox {
                    min_lon: b.min_lon.min(lon),
                    max_lon: b.max_lon.max(lon),
                    min_lat: b.min_lat.min(lat),
                    max_lat: b.max_lat.max(lat),
                },
            });
        }
        bbox
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// Azimuth timing of the radar image lines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarTiming {
    /// Zero-Doppler time of the first image line
    pub first_line_time: DateTime<Utc>,
    /// Time between consecutive lines (seconds)
    pub line_time_interval: f64,
}

/// Satellite pass direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassDirection {
    Ascending,
    Descending,
}

/// Processing steps of the preprocessing chain, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProcessingStage {
    OrbitCorrection,
    SpatialSubset,
    Calibration,
    SpeckleFilter,
    TerrainCorrection,
}

impl ProcessingStage {
    pub const ALL: [ProcessingStage; 5] = [
        ProcessingStage::OrbitCorrection,
        ProcessingStage::SpatialSubset,
        ProcessingStage::Calibration,
        ProcessingStage::SpeckleFilter,
        ProcessingStage::TerrainCorrection,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProcessingStage::OrbitCorrection => "Apply-Orbit-File",
            ProcessingStage::SpatialSubset => "Subset",
            ProcessingStage::Calibration => "Calibration",
            ProcessingStage::SpeckleFilter => "Speckle-Filter",
            ProcessingStage::TerrainCorrection => "Terrain-Correction",
        }
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Abstracted SAR product metadata carried through the chain
#[derive(Debug, Clone, Default)]
pub struct SarMetadata {
    // Product identification
    pub product_id: String,
    pub mission: String,
    pub product_type: String,
    pub acquisition_mode: String,
    pub pass: Option<PassDirection>,
    pub polarizations: Vec<Polarization>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,

    // Orbit
    pub orbit_data: Option<OrbitData>,
    pub orbit_source: Option<String>,
    pub timing: Option<RadarTiming>,

    /// (range, azimuth) pixel spacing in meters
    pub pixel_spacing: (f64, f64),

    // Calibration vectors per polarization, indexed in full-scene coordinates
    pub calibration: HashMap<Polarization, CalibrationCoefficients>,
    /// (column, row) of this raster's origin within the original scene
    pub subset_offset: (usize, usize),

    /// Stages already applied, in order
    pub history: Vec<ProcessingStage>,

    /// Free-form metadata copied from the source product
    pub annotations: BTreeMap<String, String>,
}

/// Scalar type declared for a band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    Uint8,
    Int16,
    Uint16,
    Float32,
}

impl ScalarType {
    pub fn is_integer(&self) -> bool {
        !matches!(self, ScalarType::Float32)
    }

    /// No-data value used when a descriptor does not specify one
    pub fn default_no_data(&self) -> f64 {
        if self.is_integer() { 0.0 } else { f64::NAN }
    }

    /// Convert an evaluated value into the range of this type
    pub fn cast(&self, value: f64, no_data: f64) -> f32 {
        if !value.is_finite() {
            return if self.is_integer() { self.clamp(no_data) } else { no_data as f32 };
        }
        match self {
            ScalarType::Float32 => value as f32,
            _ => self.clamp(value),
        }
    }

    fn clamp(&self, value: f64) -> f32 {
        let (lo, hi) = match self {
            ScalarType::Uint8 => (u8::MIN as f64, u8::MAX as f64),
            ScalarType::Int16 => (i16::MIN as f64, i16::MAX as f64),
            ScalarType::Uint16 => (u16::MIN as f64, u16::MAX as f64),
            ScalarType::Float32 => return value as f32,
        };
        if value.is_nan() {
            return lo as f32;
        }
        value.round().clamp(lo, hi) as f32
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarType::Uint8 => write!(f, "uint8"),
            ScalarType::Int16 => write!(f, "int16"),
            ScalarType::Uint16 => write!(f, "uint16"),
            ScalarType::Float32 => write!(f, "float32"),
        }
    }
}

impl std::str::FromStr for ScalarType {
    type Err = FloodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "uint8" => Ok(ScalarType::Uint8),
            "int16" => Ok(ScalarType::Int16),
            "uint16" => Ok(ScalarType::Uint16),
            "float32" => Ok(ScalarType::Float32),
            other => Err(FloodError::InvalidBand(format!("Unsupported scalar type: {}", other))),
        }
    }
}

/// A named raster layer. Data is shared and never mutated after creation.
#[derive(Debug, Clone)]
pub struct Band {
    pub name: String,
    pub data_type: ScalarType,
    pub data: Arc<RasterData>,
    pub no_data_value: Option<f64>,
    pub unit: Option<String>,
}

impl Band {
    pub fn new(name: impl Into<String>, data_type: ScalarType, data: RasterData) -> Self {
        Self {
            name: name.into(),
            data_type,
            data: Arc::new(data),
            no_data_value: None,
            unit: None,
        }
    }

    pub fn with_no_data(mut self, no_data: f64) -> Self {
        self.no_data_value = Some(no_data);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// (width, height)
    pub fn dimensions(&self) -> (usize, usize) {
        let (rows, cols) = self.data.dim();
        (cols, rows)
    }
}

/// In-memory multi-band georeferenced raster
#[derive(Debug, Clone)]
pub struct Product {
    pub name: String,
    pub width: usize,
    pub height: usize,
    bands: Vec<Band>,
    pub geocoding: Geocoding,
    /// Auxiliary grids such as `incident_angle`, indexed like the raster
    pub tie_point_grids: BTreeMap<String, TiePointGrid>,
    pub metadata: SarMetadata,
}

impl Product {
    pub fn new(
        name: impl Into<String>,
        width: usize,
        height: usize,
        geocoding: Geocoding,
        metadata: SarMetadata,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            bands: Vec::new(),
            geocoding,
            tie_point_grids: BTreeMap::new(),
            metadata,
        }
    }

    /// Same geocoding and metadata, no bands, new dimensions
    pub fn derive_empty(&self, name: impl Into<String>, width: usize, height: usize) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            bands: Vec::new(),
            geocoding: self.geocoding.clone(),
            tie_point_grids: self.tie_point_grids.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.iter().find(|b| b.name == name)
    }

    pub fn contains_band(&self, name: &str) -> bool {
        self.band(name).is_some()
    }

    pub fn require_band(&self, name: &str) -> FloodResult<&Band> {
        self.band(name).ok_or_else(|| FloodError::MissingBand(name.to_string()))
    }

    fn check_dimensions(&self, band: &Band) -> FloodResult<()> {
        if band.dimensions() != (self.width, self.height) {
            let (w, h) = band.dimensions();
            return Err(FloodError::InvalidBand(format!(
                "Band '{}' is {}x{} but product '{}' is {}x{}",
                band.name, w, h, self.name, self.width, self.height
            )));
        }
        Ok(())
    }

    /// Append a new band; names must stay unique
    pub fn add_band(&mut self, band: Band) -> FloodResult<()> {
        self.check_dimensions(&band)?;
        if self.contains_band(&band.name) {
            return Err(FloodError::InvalidBand(format!(
                "Band '{}' already exists in product '{}'",
                band.name, self.name
            )));
        }
        self.bands.push(band);
        Ok(())
    }

    /// Replace a band of the same name in place, or append it
    pub fn set_band(&mut self, band: Band) -> FloodResult<()> {
        self.check_dimensions(&band)?;
        match self.bands.iter_mut().find(|b| b.name == band.name) {
            Some(existing) => *existing = band,
            None => self.bands.push(band),
        }
        Ok(())
    }

    /// Copy a band in only if no band of that name exists yet.
    /// Returns whether the band was added.
    pub fn add_band_if_absent(&mut self, band: &Band) -> FloodResult<bool> {
        if self.contains_band(&band.name) {
            log::debug!("Band '{}' already present in '{}', not copied", band.name, self.name);
            return Ok(false);
        }
        self.add_band(band.clone())?;
        Ok(true)
    }

    pub fn remove_band(&mut self, name: &str) -> Option<Band> {
        let idx = self.bands.iter().position(|b| b.name == name)?;
        Some(self.bands.remove(idx))
    }

    pub fn has_applied(&self, stage: ProcessingStage) -> bool {
        self.metadata.history.contains(&stage)
    }

    /// Diagnostic listing printed after loading and after subsetting
    pub fn summary(&self) -> String {
        format!(
            "Width: {} px\nHeight: {} px\nName: {}\nBand names: {}",
            self.width,
            self.height,
            self.name,
            self.band_names().join(", ")
        )
    }
}

/// Error types for flood mapping
#[derive(Debug, thiserror::Error)]
pub enum FloodError {
    #[error("Failed to read geometry from {path}: {reason}")]
    GeometryRead { path: PathBuf, reason: String },

    #[error("{stage} failed: {cause}")]
    Stage {
        stage: ProcessingStage,
        #[source]
        cause: Box<FloodError>,
    },

    #[error("Band maths error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Failed to read product {path}: {reason}")]
    ProductRead { path: PathBuf, reason: String },

    #[error("Failed to write product {path}: {reason}")]
    ProductWrite { path: PathBuf, reason: String },

    #[error("Land cover '{source_name}' unavailable: {reason}")]
    LandCoverUnavailable { source_name: String, reason: String },

    #[error("Required band '{0}' not found")]
    MissingBand(String),

    #[error("Invalid band: {0}")]
    InvalidBand(String),

    #[error("Orbit error: {0}")]
    Orbit(String),

    #[error("DEM error: {0}")]
    Dem(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),
}

impl FloodError {
    /// Attach the failing stage to an error raised inside it
    pub fn in_stage(self, stage: ProcessingStage) -> Self {
        match self {
            already @ FloodError::Stage { .. } => already,
            cause => FloodError::Stage { stage, cause: Box::new(cause) },
        }
    }
}

/// Result type for flood mapping operations
pub type FloodResult<T> = Result<T, FloodError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geocoding::Geocoding;

    fn product(width: usize, height: usize) -> Product {
        Product::new("test", width, height, Geocoding::geographic(10.0, 45.0, 0.001), SarMetadata::default())
    }

    #[test]
    fn test_band_names_stay_unique() {
        let mut p = product(4, 3);
        p.add_band(Band::new("a", ScalarType::Float32, Array2::zeros((3, 4)))).unwrap();
        assert!(p.add_band(Band::new("a", ScalarType::Float32, Array2::zeros((3, 4)))).is_err());
        assert_eq!(p.band_names(), vec!["a"]);
    }

    #[test]
    fn test_band_dimensions_must_match() {
        let mut p = product(4, 3);
        let err = p.add_band(Band::new("a", ScalarType::Float32, Array2::zeros((4, 3))));
        assert!(matches!(err, Err(FloodError::InvalidBand(_))));
    }

    #[test]
    fn test_add_band_if_absent_is_idempotent() {
        let mut p = product(2, 2);
        let band = Band::new("flooded", ScalarType::Uint8, Array2::ones((2, 2)));
        assert!(p.add_band_if_absent(&band).unwrap());
        assert!(!p.add_band_if_absent(&band).unwrap());
        assert_eq!(p.bands().len(), 1);
    }

    #[test]
    fn test_scalar_cast() {
        assert_eq!(ScalarType::Uint8.cast(300.0, 0.0), 255.0);
        assert_eq!(ScalarType::Uint8.cast(-4.0, 0.0), 0.0);
        assert_eq!(ScalarType::Uint8.cast(f64::NAN, 0.0), 0.0);
        assert_eq!(ScalarType::Int16.cast(-2.6, 0.0), -3.0);
        assert!(ScalarType::Float32.cast(f64::NAN, f64::NAN).is_nan());
    }

    #[test]
    fn test_stage_error_wraps_once() {
        let err = FloodError::MissingBand("Sigma0_VV".into())
            .in_stage(ProcessingStage::TerrainCorrection)
            .in_stage(ProcessingStage::SpeckleFilter);
        match err {
            FloodError::Stage { stage, .. } => assert_eq!(stage, ProcessingStage::TerrainCorrection),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
