use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::core::pipeline::Stage;
use crate::types::{Band, FloodError, FloodResult, Product, ProcessingStage};

/// Available speckle filter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeckleFilterType {
    /// Mean filter (simple averaging)
    Mean,
    /// Median filter (rank filter)
    Median,
    /// Lee filter (adaptive)
    Lee,
    /// Lee Sigma filter (edge-preserving)
    LeeSigma,
    /// Frost filter (exponential weighting)
    Frost,
}

/// Speckle filtering parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeckleFilterParams {
    /// Bands to filter; empty means every band
    pub source_bands: Vec<String>,
    pub filter: SpeckleFilterType,
    /// Window width in pixels (odd)
    pub filter_size_x: usize,
    /// Window height in pixels (odd)
    pub filter_size_y: usize,
    /// Frost exponential damping
    pub damping_factor: f32,
    /// Estimate the equivalent number of looks from the image
    pub estimate_enl: bool,
    /// Equivalent number of looks when not estimated
    pub enl: f32,
    /// Nominal number of looks (Lee Sigma)
    pub num_looks: u32,
    /// Side of the Lee Sigma target window
    pub target_window_size: usize,
    /// Lee Sigma probability range
    pub sigma: f32,
    /// Adaptive neighbourhood size for IDAN filtering
    pub an_size: usize,
}

impl Default for SpeckleFilterParams {
    fn default() -> Self {
        Self {
            source_bands: vec!["Sigma0_VV".to_string()],
            filter: SpeckleFilterType::Lee,
            filter_size_x: 5,
            filter_size_y: 5,
            damping_factor: 2.0,
            estimate_enl: true,
            enl: 1.0,
            num_looks: 1,
            target_window_size: 3,
            sigma: 0.9,
            an_size: 50,
        }
    }
}

/// Speckle filter processor; each source band is replaced by its filtered version
pub struct SpeckleFilter {
    params: SpeckleFilterParams,
}

impl SpeckleFilter {
    pub fn new(params: SpeckleFilterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SpeckleFilterParams {
        &self.params
    }

    fn validate(&self, image: &Array2<f32>) -> FloodResult<()> {
        let p = &self.params;
        if p.filter_size_x % 2 == 0 || p.filter_size_y % 2 == 0 || p.target_window_size % 2 == 0 {
            return Err(FloodError::Processing(format!(
                "Filter windows must be odd, got {}x{} (target {})",
                p.filter_size_x, p.filter_size_y, p.target_window_size
            )));
        }
        if image.is_empty() {
            return Err(FloodError::Processing("Cannot filter an empty image".to_string()));
        }
        Ok(())
    }

    /// Filter one image with the configured filter
    pub fn apply_filter(&self, image: &Array2<f32>) -> FloodResult<Array2<f32>> {
        self.validate(image)?;
        log::debug!("Filter parameters: {:?}", self.params);

        let enl = match self.params.filter {
            SpeckleFilterType::Lee | SpeckleFilterType::Frost if self.params.estimate_enl => {
                match Self::estimate_number_of_looks(image) {
                    Ok(enl) => enl,
                    Err(e) => {
                        log::warn!("{}; using ENL {}", e, self.params.enl);
                        self.params.enl
                    }
                }
            }
            _ => self.params.enl,
        };

        let mut filtered = Array2::<f32>::zeros(image.dim());
        Zip::indexed(&mut filtered).par_for_each(|(i, j), out| {
            let center = image[[i, j]];
            *out = if !center.is_finite() || center <= 0.0 {
                center
            } else {
                match self.params.filter {
                    SpeckleFilterType::Mean => self.mean_pixel(image, i, j),
                    SpeckleFilterType::Median => self.median_pixel(image, i, j),
                    SpeckleFilterType::Lee => self.lee_pixel(image, i, j, enl),
                    SpeckleFilterType::LeeSigma => self.lee_sigma_pixel(image, i, j),
                    SpeckleFilterType::Frost => self.frost_pixel(image, i, j),
                }
            };
        });

        Ok(filtered)
    }

    /// Valid samples (finite, > 0) of the window of the given size centred on (i, j)
    fn window_values(image: &Array2<f32>, i: usize, j: usize, size_y: usize, size_x: usize) -> Vec<f32> {
        let (height, width) = image.dim();
        let i_range = i.saturating_sub(size_y / 2)..(i + size_y / 2 + 1).min(height);
        let j_range = j.saturating_sub(size_x / 2)..(j + size_x / 2 + 1).min(width);

        let mut values = Vec::with_capacity(size_x * size_y);
        for ii in i_range {
            for jj in j_range.clone() {
                let v = image[[ii, jj]];
                if v.is_finite() && v > 0.0 {
                    values.push(v);
                }
            }
        }
        values
    }

    /// Local mean and sample variance over the filter window
    fn local_statistics(&self, image: &Array2<f32>, i: usize, j: usize) -> (f32, f32) {
        let values = Self::window_values(image, i, j, self.params.filter_size_y, self.params.filter_size_x);
        mean_and_variance(&values).unwrap_or((0.0, 0.0))
    }

    fn mean_pixel(&self, image: &Array2<f32>, i: usize, j: usize) -> f32 {
        let values = Self::window_values(image, i, j, self.params.filter_size_y, self.params.filter_size_x);
        if values.is_empty() {
            image[[i, j]]
        } else {
            values.iter().sum::<f32>() / values.len() as f32
        }
    }

    fn median_pixel(&self, image: &Array2<f32>, i: usize, j: usize) -> f32 {
        let mut values = Self::window_values(image, i, j, self.params.filter_size_y, self.params.filter_size_x);
        if values.is_empty() {
            return image[[i, j]];
        }
        values.sort_by(|a, b| a.total_cmp(b));
        values[values.len() / 2]
    }

    fn lee_pixel(&self, image: &Array2<f32>, i: usize, j: usize, enl: f32) -> f32 {
        let center = image[[i, j]];
        let (local_mean, local_variance) = self.local_statistics(image, i, j);
        if local_mean <= 0.0 {
            return center;
        }

        // Speckle coefficient of variation for the given number of looks
        let cu = 1.0 / enl.sqrt();
        let cv = local_variance.sqrt() / local_mean;

        let weight = if cv > cu {
            (cv * cv - cu * cu) / (cv * cv * (1.0 + cu * cu))
        } else {
            0.0
        };
        local_mean + weight * (center - local_mean)
    }

    fn lee_sigma_pixel(&self, image: &Array2<f32>, i: usize, j: usize) -> f32 {
        let center = image[[i, j]];
        let target = self.params.target_window_size;
        let estimate = match mean_and_variance(&Self::window_values(image, i, j, target, target)) {
            Some((mean, _)) => mean,
            None => return center,
        };

        let cu = 1.0 / (self.params.num_looks.max(1) as f32).sqrt();
        let spread = sigma_z_score(self.params.sigma) * cu * estimate;
        let (lower, upper) = (estimate - spread, estimate + spread);

        let in_range: Vec<f32> =
            Self::window_values(image, i, j, self.params.filter_size_y, self.params.filter_size_x)
                .into_iter()
                .filter(|v| (lower..=upper).contains(v))
                .collect();

        if in_range.len() >= 3 {
            in_range.iter().sum::<f32>() / in_range.len() as f32
        } else {
            center
        }
    }

    fn frost_pixel(&self, image: &Array2<f32>, i: usize, j: usize) -> f32 {
        let center = image[[i, j]];
        let (local_mean, local_variance) = self.local_statistics(image, i, j);
        if local_mean <= 0.0 {
            return center;
        }

        let cv = local_variance.sqrt() / local_mean;
        let a = cv * cv * self.params.damping_factor;

        let (height, width) = image.dim();
        let (hy, hx) = (self.params.filter_size_y / 2, self.params.filter_size_x / 2);
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;

        for ii in i.saturating_sub(hy)..(i + hy + 1).min(height) {
            for jj in j.saturating_sub(hx)..(j + hx + 1).min(width) {
                let v = image[[ii, jj]];
                if v.is_finite() && v > 0.0 {
                    let di = ii as f32 - i as f32;
                    let dj = jj as f32 - j as f32;
                    let weight = (-a * (di * di + dj * dj).sqrt()).exp();
                    weighted_sum += weight * v;
                    weight_sum += weight;
                }
            }
        }

        if weight_sum > 0.0 {
            weighted_sum / weight_sum
        } else {
            center
        }
    }

    /// Equivalent number of looks = mean² / variance over all valid pixels, at least 1
    pub fn estimate_number_of_looks(image: &Array2<f32>) -> FloodResult<f32> {
        let values: Vec<f32> = image.iter().copied().filter(|v| v.is_finite() && *v > 0.0).collect();
        let (mean, variance) = mean_and_variance(&values)
            .ok_or_else(|| FloodError::Processing("No valid pixels to estimate looks from".to_string()))?;

        let num_looks = if variance > 0.0 {
            (mean * mean / variance).max(1.0)
        } else {
            f32::INFINITY
        };
        log::info!("Estimated number of looks: {:.2}", num_looks);
        Ok(num_looks)
    }
}

impl Stage for SpeckleFilter {
    fn kind(&self) -> ProcessingStage {
        ProcessingStage::SpeckleFilter
    }

    fn process(&self, product: &Product) -> FloodResult<Product> {
        let sources: Vec<&Band> = if self.params.source_bands.is_empty() {
            product.bands().iter().collect()
        } else {
            self.params
                .source_bands
                .iter()
                .map(|name| product.require_band(name))
                .collect::<FloodResult<_>>()?
        };
        if sources.is_empty() {
            return Err(FloodError::MissingBand("any source band".to_string()));
        }

        let mut output = product.clone();
        for band in sources {
            log::info!("Applying {:?} speckle filter to {}", self.params.filter, band.name);
            let filtered = self.apply_filter(&band.data)?;
            let mut replacement = Band::new(band.name.clone(), band.data_type, filtered);
            replacement.no_data_value = band.no_data_value;
            replacement.unit = band.unit.clone();
            output.set_band(replacement)?;
        }
        Ok(output)
    }
}

fn mean_and_variance(values: &[f32]) -> Option<(f32, f32)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = if values.len() > 1 {
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / (n - 1.0)
    } else {
        0.0
    };
    Some((mean, variance))
}

/// Two-sided normal quantile for the Lee Sigma probability range
fn sigma_z_score(sigma: f32) -> f32 {
    const TABLE: [(f32, f32); 6] = [(0.5, 0.674), (0.6, 0.842), (0.7, 1.036), (0.8, 1.282), (0.9, 1.645), (0.95, 1.960)];
    TABLE
        .iter()
        .min_by(|a, b| (a.0 - sigma).abs().total_cmp(&(b.0 - sigma).abs()))
        .map(|&(_, z)| z)
        .unwrap_or(1.645)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn checkerboard() -> Array2<f32> {
        Array2::from_shape_fn((20, 20), |(i, j)| if (i + j) % 2 == 0 { 0.02 } else { 0.04 })
    }

    #[test]
    fn test_constant_image_is_unchanged() {
        let image = Array2::from_elem((12, 9), 0.05);
        for filter in [
            SpeckleFilterType::Lee,
            SpeckleFilterType::Frost,
            SpeckleFilterType::Mean,
            SpeckleFilterType::Median,
            SpeckleFilterType::LeeSigma,
        ] {
            let params = SpeckleFilterParams { filter, ..Default::default() };
            let out = SpeckleFilter::new(params).apply_filter(&image).unwrap();
            assert!(out.iter().all(|&v| (v - 0.05).abs() < 1e-7), "{:?}", filter);
        }
    }

    #[test]
    fn test_lee_reduces_variance() {
        let image = checkerboard();
        let out = SpeckleFilter::new(SpeckleFilterParams { estimate_enl: false, ..Default::default() })
            .apply_filter(&image)
            .unwrap();
        let spread = |a: &Array2<f32>| {
            let (mean, var) = mean_and_variance(a.as_slice().unwrap()).unwrap();
            var.sqrt() / mean
        };
        assert!(spread(&out) < spread(&image));
    }

    #[test]
    fn test_invalid_pixels_pass_through() {
        let mut image = checkerboard();
        image[[5, 5]] = f32::NAN;
        image[[6, 6]] = 0.0;
        let out = SpeckleFilter::new(SpeckleFilterParams::default()).apply_filter(&image).unwrap();
        assert!(out[[5, 5]].is_nan());
        assert_eq!(out[[6, 6]], 0.0);
    }

    #[test]
    fn test_image_without_valid_pixels_is_returned_as_is() {
        let mut image = Array2::<f32>::zeros((7, 7));
        image[[3, 3]] = f32::NAN;
        for filter in [SpeckleFilterType::Lee, SpeckleFilterType::Frost] {
            let params = SpeckleFilterParams { filter, estimate_enl: true, ..Default::default() };
            let out = SpeckleFilter::new(params).apply_filter(&image).unwrap();
            assert!(out[[3, 3]].is_nan());
            assert_eq!(out.iter().filter(|v| **v == 0.0).count(), 48, "{:?}", filter);
        }
    }

    #[test]
    fn test_even_window_rejected() {
        let params = SpeckleFilterParams { filter_size_x: 4, ..Default::default() };
        assert!(SpeckleFilter::new(params).apply_filter(&checkerboard()).is_err());
    }

    #[test]
    fn test_estimate_number_of_looks() {
        let image = Array2::from_shape_vec((1, 4), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        // mean 2.5, sample variance 5/3
        assert_relative_eq!(
            SpeckleFilter::estimate_number_of_looks(&image).unwrap(),
            3.75,
            epsilon = 1e-5
        );
        assert!(SpeckleFilter::estimate_number_of_looks(&Array2::zeros((2, 2))).is_err());
    }
}
