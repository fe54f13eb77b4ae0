//! Core SAR processing modules

pub mod band_maths;
pub mod calibrate;
pub mod flood_mask;
pub mod geocoding;
pub mod geometry;
pub mod orbit_correction;
pub mod pipeline;
pub mod speckle_filter;
pub mod subset;
pub mod terrain_correction;

// Re-export main types
pub use band_maths::{apply_band_maths, BandDescriptor, ExpressionError};
pub use calibrate::{CalibrationParams, CalibrationProcessor, CalibrationType};
pub use flood_mask::{FloodMaskOrchestrator, FloodMaskParams, FloodMaskState};
pub use geometry::{load_roi, Geometry, RoiConstruction};
pub use orbit_correction::{OrbitCorrection, OrbitCorrectionParams};
pub use pipeline::{RadiometricPipeline, Stage};
pub use speckle_filter::{SpeckleFilter, SpeckleFilterParams, SpeckleFilterType};
pub use subset::{Subset, SubsetParams};
pub use terrain_correction::{TerrainCorrection, TerrainCorrectionParams};
