//! Stage contract and the fixed preprocessing chain.

use crate::core::calibrate::{CalibrationParams, CalibrationProcessor};
use crate::core::geometry::Geometry;
use crate::core::orbit_correction::{OrbitCorrection, OrbitCorrectionParams};
use crate::core::speckle_filter::{SpeckleFilter, SpeckleFilterParams};
use crate::core::subset::{Subset, SubsetParams};
use crate::core::terrain_correction::{TerrainCorrection, TerrainCorrectionParams};
use crate::io::dem::DemProvider;
use crate::io::orbit::OrbitProvider;
use crate::types::{FloodError, FloodResult, Product, ProcessingStage};

/// One step of the preprocessing chain: a pure `Product -> Product` transformation
pub trait Stage {
    fn kind(&self) -> ProcessingStage;

    /// Stage body; never mutates its input
    fn process(&self, product: &Product) -> FloodResult<Product>;

    /// Run the stage with order checking, error attribution and history tracking
    fn apply(&self, product: &Product) -> FloodResult<Product> {
        let stage = self.kind();
        if let Some(later) = product.metadata.history.iter().find(|&&done| done >= stage) {
            return Err(FloodError::Processing(format!(
                "product '{}' was already processed by {}",
                product.name, later
            ))
            .in_stage(stage));
        }

        log::info!("Running {} on '{}'", stage, product.name);
        let mut output = self.process(product).map_err(|e| e.in_stage(stage))?;
        output.metadata.history.push(stage);
        log::debug!("{} produced {}x{} with bands [{}]", stage, output.width, output.height, output.band_names().join(", "));
        Ok(output)
    }
}

/// Orbit correction, subset, calibration, speckle filter and terrain correction, in that order
pub struct RadiometricPipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl RadiometricPipeline {
    /// Chain with the fixed default parameters of every stage
    pub fn new(orbits: Box<dyn OrbitProvider>, dem: Box<dyn DemProvider>, roi: Geometry) -> Self {
        Self::with_params(
            OrbitCorrection::new(OrbitCorrectionParams::default(), orbits),
            Subset::new(SubsetParams::default(), roi),
            CalibrationParams::default(),
            SpeckleFilterParams::default(),
            TerrainCorrection::new(TerrainCorrectionParams::default(), dem),
        )
    }

    pub fn with_params(
        orbit: OrbitCorrection,
        subset: Subset,
        calibration: CalibrationParams,
        speckle: SpeckleFilterParams,
        terrain: TerrainCorrection,
    ) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(orbit),
            Box::new(subset),
            Box::new(CalibrationProcessor::new(calibration)),
            Box::new(SpeckleFilter::new(speckle)),
            Box::new(terrain),
        ];
        Self { stages }
    }

    pub fn stages(&self) -> impl Iterator<Item = ProcessingStage> + '_ {
        self.stages.iter().map(|s| s.kind())
    }

    pub fn run(&self, product: &Product) -> FloodResult<Product> {
        self.run_with(product, |_, _| {})
    }

    /// Run every stage, handing each intermediate product to `observe`
    pub fn run_with<F>(&self, product: &Product, mut observe: F) -> FloodResult<Product>
    where
        F: FnMut(ProcessingStage, &Product),
    {
        let mut current = product.clone();
        for stage in &self.stages {
            current = stage.apply(&current)?;
            observe(stage.kind(), &current);
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geocoding::Geocoding;
    use crate::types::{Band, SarMetadata, ScalarType};
    use ndarray::Array2;

    struct Doubler;

    impl Stage for Doubler {
        fn kind(&self) -> ProcessingStage {
            ProcessingStage::Calibration
        }

        fn process(&self, product: &Product) -> FloodResult<Product> {
            let band = product.require_band("x")?;
            let mut output = product.clone();
            output.set_band(Band::new("x", ScalarType::Float32, band.data.mapv(|v| v * 2.0)))?;
            Ok(output)
        }
    }

    fn product() -> Product {
        let mut p = Product::new("p", 2, 2, Geocoding::geographic(0.0, 1.0, 0.1), SarMetadata::default());
        p.add_band(Band::new("x", ScalarType::Float32, Array2::ones((2, 2)))).unwrap();
        p
    }

    #[test]
    fn test_apply_records_history_and_keeps_input() {
        let input = product();
        let output = Doubler.apply(&input).unwrap();
        assert_eq!(output.metadata.history, vec![ProcessingStage::Calibration]);
        assert_eq!(output.band("x").unwrap().data[[0, 0]], 2.0);
        assert_eq!(input.band("x").unwrap().data[[0, 0]], 1.0);
        assert!(input.metadata.history.is_empty());
    }

    #[test]
    fn test_repeated_or_late_stage_rejected() {
        let once = Doubler.apply(&product()).unwrap();
        assert!(matches!(Doubler.apply(&once), Err(FloodError::Stage { .. })));

        let mut corrected = product();
        corrected.metadata.history.push(ProcessingStage::TerrainCorrection);
        assert!(matches!(
            Doubler.apply(&corrected),
            Err(FloodError::Stage { stage: ProcessingStage::Calibration, .. })
        ));
    }

    #[test]
    fn test_failure_names_the_stage() {
        let mut p = product();
        p.remove_band("x");
        match Doubler.apply(&p) {
            Err(FloodError::Stage { stage, cause }) => {
                assert_eq!(stage, ProcessingStage::Calibration);
                assert!(matches!(*cause, FloodError::MissingBand(_)));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
