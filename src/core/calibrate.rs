use ndarray::{Array2, Zip};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::pipeline::Stage;
use crate::types::{Band, FloodError, FloodResult, Polarization, Product, ProcessingStage, ScalarType};

/// One calibration vector of a Sentinel-1 calibration annotation
#[derive(Debug, Clone)]
pub struct CalibrationVector {
    pub azimuth_time: String,
    pub line: usize,
    pub pixels: Vec<usize>,
    pub sigma_nought: Vec<f32>,
    pub beta_nought: Vec<f32>,
    pub gamma: Vec<f32>,
    pub dn: Vec<f32>,
}

impl CalibrationVector {
    fn values(&self, cal_type: CalibrationType) -> &[f32] {
        match cal_type {
            CalibrationType::Sigma0 => &self.sigma_nought,
            CalibrationType::Beta0 => &self.beta_nought,
            CalibrationType::Gamma0 => &self.gamma,
        }
    }

    /// Linear interpolation along the range direction, clamped at the ends
    fn value_at(&self, pixel: f64, cal_type: CalibrationType) -> f32 {
        let values = self.values(cal_type);
        let (i0, i1, t) = bracket(&self.pixels, |&p| p, pixel);
        values[i0] + (values[i1] - values[i0]) * t as f32
    }
}

/// Calibration look-up vectors of one polarisation, in full-scene coordinates
#[derive(Debug, Clone)]
pub struct CalibrationCoefficients {
    pub vectors: Vec<CalibrationVector>,
    pub swath: String,
    pub polarization: String,
}

impl CalibrationCoefficients {
    /// Gain at a full-scene (line, pixel) position, bilinear between vectors
    pub fn value_at(&self, line: f64, pixel: f64, cal_type: CalibrationType) -> f32 {
        let (i0, i1, t) = bracket(&self.vectors, |v| v.line, line);
        let before = self.vectors[i0].value_at(pixel, cal_type);
        if i0 == i1 {
            return before;
        }
        let after = self.vectors[i1].value_at(pixel, cal_type);
        before + (after - before) * t as f32
    }

    fn validate(&self) -> FloodResult<()> {
        if self.vectors.is_empty() {
            return Err(FloodError::Processing("No calibration vectors available".to_string()));
        }
        for (i, v) in self.vectors.iter().enumerate() {
            if v.pixels.is_empty() {
                return Err(FloodError::Processing(format!("Empty calibration vector at index {}", i)));
            }
        }
        if self.vectors.windows(2).any(|w| w[1].line < w[0].line) {
            return Err(FloodError::Processing("Calibration vectors are not sorted by line".to_string()));
        }
        Ok(())
    }
}

/// Indices of the samples surrounding `x` in a sorted sequence and the fraction between them.
/// Positions outside the sampled range snap to the nearest end sample.
fn bracket<T>(samples: &[T], position: impl Fn(&T) -> usize, x: f64) -> (usize, usize, f64) {
    let len = samples.len();
    let upper = samples.partition_point(|s| position(s) as f64 <= x);
    if upper == 0 {
        return (0, 0, 0.0);
    }
    if upper >= len {
        return (len - 1, len - 1, 0.0);
    }
    let (i0, i1) = (upper - 1, upper);
    let (p0, p1) = (position(&samples[i0]) as f64, position(&samples[i1]) as f64);
    let span = p1 - p0;
    let t = if span > 0.0 { (x - p0) / span } else { 0.0 };
    (i0, i1, t)
}

/// Types of radiometric calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationType {
    Sigma0, // Radar cross section per unit ground area
    Beta0,  // Radar brightness
    Gamma0, // Backscatter normalised by incidence
}

impl CalibrationType {
    pub fn band_prefix(&self) -> &'static str {
        match self {
            CalibrationType::Sigma0 => "Sigma0",
            CalibrationType::Beta0 => "Beta0",
            CalibrationType::Gamma0 => "Gamma0",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationParams {
    pub output_type: CalibrationType,
    pub polarizations: Vec<Polarization>,
    pub output_image_in_db: bool,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            output_type: CalibrationType::Sigma0,
            polarizations: vec![Polarization::VV],
            output_image_in_db: false,
        }
    }
}

/// Intensity -> calibrated backscatter, one output band per selected polarisation
pub struct CalibrationProcessor {
    params: CalibrationParams,
}

impl CalibrationProcessor {
    pub fn new(params: CalibrationParams) -> Self {
        Self { params }
    }

    /// Per-pixel gain A for a raster that starts at `offset` (column, row) in the scene
    fn build_calibration_lut(
        coefficients: &CalibrationCoefficients,
        dims: (usize, usize),
        offset: (usize, usize),
        cal_type: CalibrationType,
    ) -> FloodResult<Array2<f32>> {
        coefficients.validate()?;
        log::debug!("Building {}x{} calibration LUT at offset {:?}", dims.0, dims.1, offset);

        let mut lut = Array2::<f32>::zeros(dims);
        Zip::indexed(&mut lut).par_for_each(|(row, col), gain| {
            let line = (row + offset.1) as f64;
            let pixel = (col + offset.0) as f64;
            *gain = coefficients.value_at(line, pixel, cal_type);
        });
        Ok(lut)
    }

    fn calibrate_band(&self, product: &Product, pol: Polarization) -> FloodResult<Band> {
        let source_name = format!("Intensity_{}", pol);
        let source = product.require_band(&source_name)?;
        let intensity = source.data.as_ref();

        let calibrated = match product.metadata.calibration.get(&pol) {
            Some(coefficients) => {
                let lut = Self::build_calibration_lut(
                    coefficients,
                    intensity.dim(),
                    product.metadata.subset_offset,
                    self.params.output_type,
                )?;
                Zip::from(intensity).and(&lut).par_map_collect(|&value, &gain| {
                    if gain > 0.0 {
                        value / (gain * gain)
                    } else {
                        0.0
                    }
                })
            }
            None => {
                log::warn!("No calibration vectors for {}, using unity gain", pol);
                intensity.clone()
            }
        };

        let (data, unit) = if self.params.output_image_in_db {
            (to_db(&calibrated), "dB")
        } else {
            (calibrated, "intensity")
        };

        let name = format!("{}_{}", self.params.output_type.band_prefix(), pol);
        log::info!("Calibrated {} -> {}", source_name, name);
        Ok(Band::new(name, ScalarType::Float32, data)
            .with_no_data(0.0)
            .with_unit(unit))
    }
}

impl Stage for CalibrationProcessor {
    fn kind(&self) -> ProcessingStage {
        ProcessingStage::Calibration
    }

    fn process(&self, product: &Product) -> FloodResult<Product> {
        log::debug!("Calibration parameters: {:?}", self.params);
        let mut output = product.derive_empty(product.name.clone(), product.width, product.height);
        for &pol in &self.params.polarizations {
            output.add_band(self.calibrate_band(product, pol)?)?;
        }
        Ok(output)
    }
}

/// Convert linear backscatter to dB; non-positive values map to the -50 dB floor
pub fn to_db(linear: &Array2<f32>) -> Array2<f32> {
    linear.mapv(|x| if x > 0.0 { 10.0 * x.log10() } else { -50.0 })
}

/// Parse a Sentinel-1 `annotation/calibration/calibration-*.xml` document
pub fn parse_calibration_from_xml(xml_content: &str) -> FloodResult<CalibrationCoefficients> {
    let vector_pattern = Regex::new(r"(?s)<calibrationVector>(.*?)</calibrationVector>")
        .map_err(|e| FloodError::XmlParsing(format!("Regex error: {}", e)))?;

    let mut vectors = Vec::new();
    for captures in vector_pattern.captures_iter(xml_content) {
        match parse_single_calibration_vector(&captures[1]) {
            Ok(vector) => vectors.push(vector),
            Err(e) => log::warn!("Skipping calibration vector: {}", e),
        }
    }
    if vectors.is_empty() {
        return Err(FloodError::XmlParsing("No calibration vectors found in XML".to_string()));
    }
    vectors.sort_by_key(|v| v.line);

    let swath = extract_xml_value(xml_content, "swath").unwrap_or_else(|| "IW".to_string());
    let polarization = extract_xml_value(xml_content, "polarisation").unwrap_or_else(|| "VV".to_string());
    log::debug!("Parsed {} calibration vectors for {}/{}", vectors.len(), swath, polarization);

    Ok(CalibrationCoefficients { vectors, swath, polarization })
}

fn parse_single_calibration_vector(vector_xml: &str) -> FloodResult<CalibrationVector> {
    let field = |tag: &str| {
        extract_xml_value(vector_xml, tag).ok_or_else(|| FloodError::XmlParsing(format!("Missing {}", tag)))
    };

    let azimuth_time = field("azimuthTime")?;
    let line = field("line")?
        .parse::<usize>()
        .map_err(|e| FloodError::XmlParsing(format!("Invalid line number: {}", e)))?;
    let pixels = parse_space_separated_numbers::<usize>(&field("pixel")?)?;
    let sigma_nought = parse_space_separated_numbers::<f32>(&field("sigmaNought")?)?;
    let beta_nought = parse_space_separated_numbers::<f32>(&field("betaNought")?)?;
    let gamma = parse_space_separated_numbers::<f32>(&field("gamma")?)?;
    let dn = parse_space_separated_numbers::<f32>(&field("dn")?)?;

    let n = pixels.len();
    if [sigma_nought.len(), beta_nought.len(), gamma.len(), dn.len()].iter().any(|&len| len != n) {
        return Err(FloodError::XmlParsing(
            "Calibration vector arrays have mismatched lengths".to_string(),
        ));
    }

    Ok(CalibrationVector { azimuth_time, line, pixels, sigma_nought, beta_nought, gamma, dn })
}

fn parse_space_separated_numbers<T>(input: &str) -> FloodResult<Vec<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    input
        .split_whitespace()
        .map(|s| s.parse::<T>().map_err(|e| FloodError::XmlParsing(format!("Parse error: {}", e))))
        .collect()
}

/// First text value of `<tag ...>value</tag>`
fn extract_xml_value(xml_content: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"<{}(?:\s[^>]*)?>\s*([^<]*?)\s*</{}>", regex::escape(tag), regex::escape(tag));
    let re = Regex::new(&pattern).ok()?;
    re.captures(xml_content).map(|cap| cap[1].to_string())
}
