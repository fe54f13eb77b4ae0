use crate::types::{FloodError, FloodResult, OrbitData, StateVector};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Orbit file types published by ESA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbitType {
    /// Precise Orbit Ephemerides (best accuracy, ~20 days delay)
    POEORB,
    /// Restituted Orbit Ephemerides (lower accuracy, ~3 hours delay)
    RESORB,
}

impl std::fmt::Display for OrbitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrbitType::POEORB => write!(f, "POEORB"),
            OrbitType::RESORB => write!(f, "RESORB"),
        }
    }
}

/// Source of orbit ephemerides for an acquisition
pub trait OrbitProvider {
    /// State vectors of `mission` (e.g. `S1A`) covering `[start, stop]`
    fn orbit_for(
        &self,
        mission: &str,
        orbit_type: OrbitType,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> FloodResult<OrbitData>;
}

/// Local directory of ESA `.EOF` (or `.EOF.zip`) orbit files
#[derive(Debug, Clone)]
pub struct OrbitDirectory {
    dir: PathBuf,
}

impl OrbitDirectory {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Validity window encoded in `S1A_OPER_AUX_POEORB_OPOD_<prod>_V<start>_<end>.EOF`
    pub fn validity_window(filename: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let stem = filename.trim_end_matches(".zip").trim_end_matches(".EOF");
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() < 8 {
            return None;
        }
        let start = parse_orbit_filename_time(parts[parts.len() - 2].strip_prefix('V')?)?;
        let end = parse_orbit_filename_time(parts[parts.len() - 1])?;
        Some((start, end))
    }

    fn candidates(&self, mission: &str, orbit_type: OrbitType) -> FloodResult<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Err(FloodError::Orbit(format!(
                "Orbit directory {} does not exist",
                self.dir.display()
            )));
        }

        let type_tag = orbit_type.to_string();
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_eof = name.ends_with(".EOF") || name.ends_with(".EOF.zip");
            if is_eof && name.starts_with(mission) && name.contains(&type_tag) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl OrbitProvider for OrbitDirectory {
    fn orbit_for(
        &self,
        mission: &str,
        orbit_type: OrbitType,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> FloodResult<OrbitData> {
        for path in self.candidates(mission, orbit_type)? {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            match Self::validity_window(name) {
                Some((valid_from, valid_to)) if valid_from <= start && valid_to >= stop => {
                    log::info!("Using {} orbit file {}", orbit_type, path.display());
                    return OrbitReader::read_orbit_file(&path);
                }
                Some(_) => continue,
                None => log::debug!("Ignoring orbit file with unexpected name {}", name),
            }
        }
        Err(FloodError::Orbit(format!(
            "No {} {} orbit file in {} covers {} to {}",
            mission,
            orbit_type,
            self.dir.display(),
            start.format("%Y-%m-%dT%H:%M:%S"),
            stop.format("%Y-%m-%dT%H:%M:%S")
        )))
    }
}

fn parse_orbit_filename_time(time_str: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(time_str, "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
}

/// Precise orbit file reader and interpolation
pub struct OrbitReader;

impl OrbitReader {
    /// Read an EOF orbit file, plain or zipped
    pub fn read_orbit_file<P: AsRef<Path>>(path: P) -> FloodResult<OrbitData> {
        let path = path.as_ref();
        log::info!("Reading orbit file: {}", path.display());

        let content = if path.extension().map_or(false, |e| e == "zip") {
            Self::extract_eof_from_zip(path)?
        } else {
            fs::read_to_string(path)?
        };
        Self::parse_eof_content(&content)
    }

    fn extract_eof_from_zip(path: &Path) -> FloodResult<String> {
        let file = fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| FloodError::Orbit(format!("Failed to open {}: {}", path.display(), e)))?;

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| FloodError::Orbit(format!("Failed to read zip entry: {}", e)))?;
            if entry.name().ends_with(".EOF") {
                let mut content = String::new();
                entry.read_to_string(&mut content)?;
                return Ok(content);
            }
        }
        Err(FloodError::Orbit(format!("No .EOF file found in {}", path.display())))
    }

    /// Parse the `<OSV>` blocks of an Earth Explorer orbit file
    pub fn parse_eof_content(content: &str) -> FloodResult<OrbitData> {
        let mut state_vectors = Vec::new();
        let mut current: Option<OsvBuilder> = None;

        for line in content.lines().map(str::trim) {
            if line.contains("<OSV>") {
                current = Some(OsvBuilder::default());
                continue;
            }
            if line.contains("</OSV>") {
                if let Some(sv) = current.take().and_then(OsvBuilder::build) {
                    state_vectors.push(sv);
                }
                continue;
            }
            let Some(osv) = current.as_mut() else {
                continue;
            };

            if let Some(value) = extract_xml_value(line, "UTC") {
                let time_str = value.strip_prefix("UTC=").unwrap_or(&value);
                osv.time = NaiveDateTime::parse_from_str(time_str, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc));
                continue;
            }
            for (idx, tag) in ["X", "Y", "Z", "VX", "VY", "VZ"].iter().enumerate() {
                if let Some(value) = extract_xml_value(line, tag).and_then(|v| v.trim().parse::<f64>().ok()) {
                    if idx < 3 {
                        osv.position[idx] = Some(value);
                    } else {
                        osv.velocity[idx - 3] = Some(value);
                    }
                    break;
                }
            }
        }

        if state_vectors.is_empty() {
            return Err(FloodError::Orbit(
                "No valid state vectors found, expected <OSV> blocks".to_string(),
            ));
        }
        state_vectors.sort_by_key(|sv| sv.time);
        validate_orbit_data(&state_vectors);

        log::info!(
            "Parsed {} state vectors from {} to {}",
            state_vectors.len(),
            state_vectors[0].time.format("%Y-%m-%d %H:%M:%S"),
            state_vectors[state_vectors.len() - 1].time.format("%Y-%m-%d %H:%M:%S")
        );

        Ok(OrbitData {
            reference_time: state_vectors[0].time,
            state_vectors,
        })
    }

    /// Lagrange interpolation of the position at `target_time` using `degree + 1` support vectors
    pub fn interpolate_position(orbit: &OrbitData, target_time: DateTime<Utc>, degree: usize) -> FloodResult<[f64; 3]> {
        let t = timestamp(target_time);
        let support = find_interpolation_vectors(&orbit.state_vectors, t, degree + 1)?;
        Ok(lagrange_interpolate(&support, t, |sv| sv.position))
    }

    pub fn interpolate_velocity(orbit: &OrbitData, target_time: DateTime<Utc>, degree: usize) -> FloodResult<[f64; 3]> {
        let t = timestamp(target_time);
        let support = find_interpolation_vectors(&orbit.state_vectors, t, degree + 1)?;
        Ok(lagrange_interpolate(&support, t, |sv| sv.velocity))
    }
}

#[derive(Default)]
struct OsvBuilder {
    time: Option<DateTime<Utc>>,
    position: [Option<f64>; 3],
    velocity: [Option<f64>; 3],
}

impl OsvBuilder {
    fn build(self) -> Option<StateVector> {
        let [x, y, z] = self.position;
        let [vx, vy, vz] = self.velocity;
        Some(StateVector {
            time: self.time?,
            position: [x?, y?, z?],
            velocity: [vx?, vy?, vz?],
        })
    }
}

/// Seconds since the epoch with millisecond precision
fn timestamp(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

/// Value of `<tag ...>value</tag>` on a single line
fn extract_xml_value(line: &str, tag: &str) -> Option<String> {
    let rest = line.strip_prefix('<')?.strip_prefix(tag)?;
    if !(rest.starts_with('>') || rest.starts_with(' ')) {
        return None;
    }
    let content_start = rest.find('>')? + 1;
    let content = &rest[content_start..];
    let end = content.find(&format!("</{}>", tag))?;
    Some(content[..end].to_string())
}

fn validate_orbit_data(state_vectors: &[StateVector]) {
    let norm = |v: &[f64; 3]| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    for sv in state_vectors {
        let speed = norm(&sv.velocity);
        let radius = norm(&sv.position);
        if !(6000.0..=9000.0).contains(&speed) {
            log::warn!("Unusual orbital velocity: {:.1} m/s at {}", speed, sv.time);
        }
        if !(6_500_000.0..=7_500_000.0).contains(&radius) {
            log::warn!("Unusual orbital radius: {:.1} km at {}", radius / 1000.0, sv.time);
        }
    }
}

/// `count` consecutive vectors centred on the one closest to `target`
fn find_interpolation_vectors(state_vectors: &[StateVector], target: f64, count: usize) -> FloodResult<&[StateVector]> {
    if state_vectors.is_empty() {
        return Err(FloodError::Orbit("No state vectors available".to_string()));
    }

    let closest = binary_search_closest_time(state_vectors, target);
    let count = count.clamp(1, state_vectors.len());
    let start = closest
        .saturating_sub(count / 2)
        .min(state_vectors.len() - count);
    Ok(&state_vectors[start..start + count])
}

fn binary_search_closest_time(state_vectors: &[StateVector], target: f64) -> usize {
    let idx = state_vectors.partition_point(|sv| timestamp(sv.time) < target);
    if idx == 0 {
        return 0;
    }
    if idx >= state_vectors.len() {
        return state_vectors.len() - 1;
    }
    let before = (timestamp(state_vectors[idx - 1].time) - target).abs();
    let after = (timestamp(state_vectors[idx].time) - target).abs();
    if before < after {
        idx - 1
    } else {
        idx
    }
}

fn lagrange_interpolate<F: Fn(&StateVector) -> [f64; 3]>(support: &[StateVector], target: f64, value: F) -> [f64; 3] {
    let mut result = [0.0; 3];
    for (i, sv_i) in support.iter().enumerate() {
        let ti = timestamp(sv_i.time);
        let weight: f64 = support
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, sv_j)| {
                let tj = timestamp(sv_j.time);
                (target - tj) / (ti - tj)
            })
            .product();

        let v = value(sv_i);
        for k in 0..3 {
            result[k] += weight * v[k];
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn linear_orbit() -> OrbitData {
        let t0 = Utc.with_ymd_and_hms(2020, 1, 3, 17, 0, 0).unwrap();
        let state_vectors = (0..8)
            .map(|i| {
                let t = i as f64 * 10.0;
                StateVector {
                    time: t0 + chrono::Duration::seconds(i * 10),
                    position: [7_000_000.0 + 7000.0 * t, 100.0 * t * t, -50.0 * t],
                    velocity: [7000.0, 200.0 * t, -50.0],
                }
            })
            .collect();
        OrbitData { state_vectors, reference_time: t0 }
    }

    #[test]
    fn test_lagrange_reproduces_polynomial() {
        let orbit = linear_orbit();
        let t = orbit.reference_time + chrono::Duration::milliseconds(33_500);
        let pos = OrbitReader::interpolate_position(&orbit, t, 3).unwrap();
        assert_relative_eq!(pos[0], 7_000_000.0 + 7000.0 * 33.5, epsilon = 1e-4);
        assert_relative_eq!(pos[1], 100.0 * 33.5 * 33.5, epsilon = 1e-4);
        let vel = OrbitReader::interpolate_velocity(&orbit, t, 3).unwrap();
        assert_relative_eq!(vel[1], 200.0 * 33.5, epsilon = 1e-6);
    }

    #[test]
    fn test_support_window_at_edges() {
        let orbit = linear_orbit();
        let first = find_interpolation_vectors(&orbit.state_vectors, 0.0, 4).unwrap();
        assert_eq!(first.len(), 4);
        assert_eq!(first[0].time, orbit.state_vectors[0].time);
        let last = find_interpolation_vectors(&orbit.state_vectors, f64::MAX, 4).unwrap();
        assert_eq!(last[3].time, orbit.state_vectors[7].time);
    }

    #[test]
    fn test_validity_window_from_filename() {
        let (start, end) = OrbitDirectory::validity_window(
            "S1A_OPER_AUX_POEORB_OPOD_20200123T120000_V20200102T225942_20200104T005942.EOF",
        )
        .unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2020, 1, 2, 22, 59, 42).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2020, 1, 4, 0, 59, 42).unwrap());
        assert!(OrbitDirectory::validity_window("orbit.EOF").is_none());
    }

    #[test]
    fn test_extract_value_with_attributes() {
        assert_eq!(extract_xml_value(r#"<X unit="m">-1.5</X>"#, "X").as_deref(), Some("-1.5"));
        assert_eq!(extract_xml_value("<VX unit=\"m/s\">2</VX>", "X"), None);
    }
}
