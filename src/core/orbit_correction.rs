use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::core::pipeline::Stage;
use crate::io::orbit::{OrbitProvider, OrbitReader, OrbitType};
use crate::types::{FloodError, FloodResult, OrbitData, Product, ProcessingStage, StateVector};

/// Margin around the acquisition for which precise vectors are taken when the product has none
const ORBIT_MARGIN_SECONDS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbitCorrectionParams {
    pub orbit_type: OrbitType,
    /// Lagrange polynomial degree
    pub poly_degree: usize,
    /// Keep the product's own orbit when no precise orbit can be applied
    pub continue_on_fail: bool,
}

impl Default for OrbitCorrectionParams {
    fn default() -> Self {
        Self {
            orbit_type: OrbitType::POEORB,
            poly_degree: 3,
            continue_on_fail: false,
        }
    }
}

/// Replaces the product's state vectors with ones interpolated from a precise orbit
pub struct OrbitCorrection {
    params: OrbitCorrectionParams,
    provider: Box<dyn OrbitProvider>,
}

impl OrbitCorrection {
    pub fn new(params: OrbitCorrectionParams, provider: Box<dyn OrbitProvider>) -> Self {
        Self { params, provider }
    }

    /// Mission tag used in orbit file names (`S1A`, `S1B`)
    fn mission_tag(product: &Product) -> String {
        let id = &product.metadata.product_id;
        if let Some(tag) = id.get(..3).filter(|t| t.starts_with("S1")) {
            return tag.to_uppercase();
        }
        let mission = product.metadata.mission.to_uppercase();
        match mission.as_str() {
            "SENTINEL-1A" => "S1A".to_string(),
            "SENTINEL-1B" => "S1B".to_string(),
            "" => "S1A".to_string(),
            _ => mission,
        }
    }

    fn refined_orbit(&self, product: &Product) -> FloodResult<OrbitData> {
        let metadata = &product.metadata;
        let (start, stop) = match (metadata.start_time, metadata.stop_time) {
            (Some(start), Some(stop)) => (start, stop),
            _ => return Err(FloodError::Orbit("Product has no acquisition time".to_string())),
        };

        let mission = Self::mission_tag(product);
        let precise = self.provider.orbit_for(&mission, self.params.orbit_type, start, stop)?;

        let state_vectors = match &metadata.orbit_data {
            Some(existing) if !existing.state_vectors.is_empty() => existing
                .state_vectors
                .iter()
                .map(|sv| {
                    Ok(StateVector {
                        time: sv.time,
                        position: OrbitReader::interpolate_position(&precise, sv.time, self.params.poly_degree)?,
                        velocity: OrbitReader::interpolate_velocity(&precise, sv.time, self.params.poly_degree)?,
                    })
                })
                .collect::<FloodResult<Vec<_>>>()?,
            _ => {
                let margin = Duration::seconds(ORBIT_MARGIN_SECONDS);
                let window: Vec<StateVector> = precise
                    .state_vectors
                    .iter()
                    .filter(|sv| sv.time >= start - margin && sv.time <= stop + margin)
                    .cloned()
                    .collect();
                if window.is_empty() {
                    return Err(FloodError::Orbit(format!(
                        "Precise orbit has no state vectors within {} s of the acquisition",
                        ORBIT_MARGIN_SECONDS
                    )));
                }
                window
            }
        };

        log::info!("Applied {} orbit to {} state vectors", self.params.orbit_type, state_vectors.len());
        Ok(OrbitData { reference_time: state_vectors[0].time, state_vectors })
    }
}

impl Stage for OrbitCorrection {
    fn kind(&self) -> ProcessingStage {
        ProcessingStage::OrbitCorrection
    }

    fn process(&self, product: &Product) -> FloodResult<Product> {
        log::debug!("Orbit correction parameters: {:?}", self.params);
        let mut output = product.clone();
        match self.refined_orbit(product) {
            Ok(orbit) => {
                output.metadata.orbit_data = Some(orbit);
                output.metadata.orbit_source = Some(self.params.orbit_type.to_string());
            }
            Err(e) if self.params.continue_on_fail => {
                log::warn!("Precise orbit not applied, keeping the product orbit: {}", e);
            }
            Err(e) => return Err(e),
        }
        Ok(output)
    }
}
