use crate::core::calibrate::parse_calibration_from_xml;
use crate::core::geocoding::Geocoding;
use crate::io::annotation::{parse_utc, AnnotationParser, AnnotationRoot};
use crate::types::{Band, FloodError, FloodResult, OrbitData, Polarization, Product, SarMetadata, ScalarType};
use ndarray::{Array2, Zip};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zip::ZipArchive;

enum SafeSource {
    Archive(ZipArchive<File>),
    Directory(PathBuf),
}

/// Reader for Sentinel-1 GRD products, zipped or as an unpacked `.SAFE` directory
pub struct Sentinel1Reader {
    path: PathBuf,
    source: SafeSource,
    files: Vec<String>,
}

impl Sentinel1Reader {
    /// Whether `path` looks like a Sentinel-1 product (`.zip`, `.SAFE` or `manifest.safe`)
    pub fn is_sentinel1<P: AsRef<Path>>(path: P) -> bool {
        let path = path.as_ref();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        name.eq_ignore_ascii_case("manifest.safe")
            || name.to_uppercase().ends_with(".SAFE")
            || name.to_lowercase().ends_with(".zip")
    }

    pub fn open<P: AsRef<Path>>(path: P) -> FloodResult<Self> {
        let mut path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(FloodError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", path.display()),
            )));
        }
        if path.file_name().map_or(false, |n| n.eq_ignore_ascii_case("manifest.safe")) {
            if let Some(parent) = path.parent() {
                path = parent.to_path_buf();
            }
        }

        let (source, files) = if path.is_dir() {
            let mut files = Vec::new();
            collect_relative_files(&path, &path, &mut files)?;
            (SafeSource::Directory(path.clone()), files)
        } else {
            let archive = ZipArchive::new(File::open(&path)?)
                .map_err(|e| FloodError::InvalidFormat(format!("Failed to open ZIP: {}", e)))?;
            let files = archive.file_names().map(str::to_string).collect();
            (SafeSource::Archive(archive), files)
        };

        Ok(Self { path, source, files })
    }

    pub fn list_files(&self) -> &[String] {
        &self.files
    }

    /// Product name: the `.SAFE` folder or archive name without extension
    pub fn product_name(&self) -> String {
        let from_safe_folder = self
            .files
            .iter()
            .find_map(|f| f.split('/').find(|part| part.ends_with(".SAFE")))
            .map(|s| s.trim_end_matches(".SAFE").to_string());
        from_safe_folder.unwrap_or_else(|| {
            self.path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("product")
                .trim_end_matches(".SAFE")
                .to_string()
        })
    }

    /// Measurement rasters by polarisation, in archive order
    pub fn find_measurement_files(&self) -> Vec<(Polarization, String)> {
        let mut measurements: Vec<(Polarization, String)> = Vec::new();
        for file in &self.files {
            let is_raster = file.ends_with(".tiff") || file.ends_with(".tif");
            if file.contains("measurement/") && is_raster {
                if let Some(pol) = Polarization::from_filename(file) {
                    if !measurements.iter().any(|(p, _)| *p == pol) {
                        measurements.push((pol, file.clone()));
                    }
                }
            }
        }
        measurements
    }

    fn find_file(&self, suffix: &str) -> Option<String> {
        self.files.iter().find(|f| f.ends_with(suffix)).cloned()
    }

    fn read_file_as_string(&mut self, file_path: &str) -> FloodResult<String> {
        match &mut self.source {
            SafeSource::Directory(root) => Ok(std::fs::read_to_string(root.join(file_path))?),
            SafeSource::Archive(archive) => {
                let mut file = archive
                    .by_name(file_path)
                    .map_err(|e| FloodError::InvalidFormat(format!("Failed to access {}: {}", file_path, e)))?;
                let mut content = String::new();
                file.read_to_string(&mut content)?;
                Ok(content)
            }
        }
    }

    /// Read band 1 of a measurement raster as f32
    fn read_raster(&mut self, file_path: &str) -> FloodResult<Array2<f32>> {
        match &mut self.source {
            SafeSource::Directory(root) => read_first_band(&root.join(file_path)),
            SafeSource::Archive(archive) => {
                // GDAL reads the TIFF from a temporary copy outside the archive
                let mut zip_file = archive
                    .by_name(file_path)
                    .map_err(|e| FloodError::InvalidFormat(format!("Failed to access {}: {}", file_path, e)))?;
                let mut temp_file = NamedTempFile::new()?;
                std::io::copy(&mut zip_file, &mut temp_file)?;
                read_first_band(temp_file.path())
            }
        }
    }

    /// Assemble an in-memory product with `Amplitude_<POL>` and `Intensity_<POL>` bands
    pub fn read_product(&mut self) -> FloodResult<Product> {
        let measurements = self.find_measurement_files();
        if measurements.is_empty() {
            return Err(FloodError::InvalidFormat(format!(
                "No measurement rasters in {}",
                self.path.display()
            )));
        }
        log::info!("Found {} measurement rasters in {}", measurements.len(), self.path.display());

        let mut product: Option<Product> = None;
        for (pol, measurement) in &measurements {
            let stem = measurement
                .rsplit('/')
                .next()
                .unwrap_or(measurement)
                .trim_end_matches(".tiff")
                .trim_end_matches(".tif")
                .to_string();

            let annotation_file = self
                .find_file(&format!("annotation/{}.xml", stem))
                .ok_or_else(|| FloodError::InvalidFormat(format!("No annotation for {}", measurement)))?;

            let amplitude = self.read_raster(measurement)?;
            let (height, width) = amplitude.dim();

            if product.is_none() {
                let xml = self.read_file_as_string(&annotation_file)?;
                let annotation = AnnotationParser::parse_annotation(&xml)?;
                product = Some(self.build_product(&annotation, width, height)?);
            }
            let Some(current) = product.as_mut() else {
                continue;
            };

            match self.find_file(&format!("annotation/calibration/calibration-{}.xml", stem)) {
                Some(cal_file) => {
                    let xml = self.read_file_as_string(&cal_file)?;
                    match parse_calibration_from_xml(&xml) {
                        Ok(coefficients) => {
                            current.metadata.calibration.insert(*pol, coefficients);
                        }
                        Err(e) => log::warn!("Ignoring calibration for {}: {}", pol, e),
                    }
                }
                None => log::warn!("No calibration annotation for {}", pol),
            }

            let intensity = Zip::from(&amplitude).par_map_collect(|&a| a * a);
            current.add_band(Band::new(format!("Amplitude_{}", pol), ScalarType::Uint16, amplitude).with_unit("amplitude"))?;
            current.add_band(Band::new(format!("Intensity_{}", pol), ScalarType::Float32, intensity).with_unit("intensity"))?;
            current.metadata.polarizations.push(*pol);
        }

        product.ok_or_else(|| FloodError::InvalidFormat("No readable measurement".to_string()))
    }

    fn build_product(&self, annotation: &AnnotationRoot, width: usize, height: usize) -> FloodResult<Product> {
        let header = &annotation.ads_header;
        let info = &annotation.image_annotation.image_information;
        if info.number_of_samples != width || info.number_of_lines != height {
            log::warn!(
                "Annotation size {}x{} differs from raster size {}x{}",
                info.number_of_samples,
                info.number_of_lines,
                width,
                height
            );
        }

        let grids = AnnotationParser::geolocation_grids(annotation)?;
        let state_vectors = AnnotationParser::state_vectors(annotation)?;
        let name = self.product_name();

        let mut metadata = SarMetadata {
            product_id: name.clone(),
            mission: header.mission_id.clone(),
            product_type: header.product_type.clone(),
            acquisition_mode: header.mode.clone(),
            pass: AnnotationParser::pass_direction(annotation),
            start_time: Some(parse_utc(&header.start_time)?),
            stop_time: Some(parse_utc(&header.stop_time)?),
            timing: Some(AnnotationParser::timing(annotation)?),
            pixel_spacing: (info.range_pixel_spacing, info.azimuth_pixel_spacing),
            ..Default::default()
        };
        if let Some(first) = state_vectors.first() {
            metadata.orbit_data = Some(OrbitData { reference_time: first.time, state_vectors });
            metadata.orbit_source = Some("annotation".to_string());
        }
        metadata.annotations.insert("MISSION".into(), header.mission_id.clone());
        metadata.annotations.insert("PRODUCT_TYPE".into(), header.product_type.clone());
        metadata.annotations.insert("ACQUISITION_MODE".into(), header.mode.clone());
        metadata.annotations.insert("first_line_time".into(), info.product_first_line_utc_time.clone());

        let geocoding = Geocoding::TiePoint {
            latitude: grids.latitude.clone(),
            longitude: grids.longitude.clone(),
        };
        let mut product = Product::new(name, width, height, geocoding, metadata);
        product.tie_point_grids.insert("latitude".into(), grids.latitude);
        product.tie_point_grids.insert("longitude".into(), grids.longitude);
        product.tie_point_grids.insert("incident_angle".into(), grids.incidence_angle);
        Ok(product)
    }
}

fn collect_relative_files(root: &Path, dir: &Path, files: &mut Vec<String>) -> FloodResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_relative_files(root, &path, files)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let parts: Vec<String> = relative.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
            files.push(parts.join("/"));
        }
    }
    files.sort();
    Ok(())
}

fn read_first_band(path: &Path) -> FloodResult<Array2<f32>> {
    let dataset = gdal::Dataset::open(path)?;
    let (width, height) = dataset.raster_size();
    let band = dataset.rasterband(1)?;
    log::debug!("Reading {}x{} {:?} raster {}", width, height, band.band_type(), path.display());
    let buffer = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
    Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| FloodError::InvalidFormat(format!("Failed to reshape raster: {}", e)))
}
