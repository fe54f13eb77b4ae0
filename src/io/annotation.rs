use crate::core::geocoding::TiePointGrid;
use crate::types::{FloodError, FloodResult, PassDirection, RadarTiming, StateVector};
use chrono::{DateTime, NaiveDateTime, Utc};
use ndarray::Array2;
use quick_xml::de::from_str;
use serde::Deserialize;

/// Root `<product>` element of a Sentinel-1 GRD product annotation
#[derive(Debug, Deserialize)]
pub struct AnnotationRoot {
    #[serde(rename = "adsHeader")]
    pub ads_header: AdsHeader,
    #[serde(rename = "generalAnnotation")]
    pub general_annotation: GeneralAnnotation,
    #[serde(rename = "imageAnnotation")]
    pub image_annotation: ImageAnnotation,
    #[serde(rename = "geolocationGrid")]
    pub geolocation_grid: GeolocationGrid,
}

#[derive(Debug, Deserialize)]
pub struct AdsHeader {
    #[serde(rename = "missionId")]
    pub mission_id: String,
    #[serde(rename = "productType")]
    pub product_type: String,
    pub polarisation: String,
    pub mode: String,
    #[serde(rename = "startTime")]
    pub start_time: String,
    #[serde(rename = "stopTime")]
    pub stop_time: String,
}

#[derive(Debug, Deserialize)]
pub struct GeneralAnnotation {
    #[serde(rename = "productInformation")]
    pub product_information: ProductInformation,
    #[serde(rename = "orbitList", default)]
    pub orbit_list: OrbitList,
}

#[derive(Debug, Deserialize)]
pub struct ProductInformation {
    pub pass: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrbitList {
    #[serde(rename = "orbit", default)]
    pub orbits: Vec<OrbitEntry>,
}

#[derive(Debug, Deserialize)]
pub struct OrbitEntry {
    pub time: String,
    pub position: Xyz,
    pub velocity: Xyz,
}

#[derive(Debug, Deserialize)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Deserialize)]
pub struct ImageAnnotation {
    #[serde(rename = "imageInformation")]
    pub image_information: ImageInformation,
}

#[derive(Debug, Deserialize)]
pub struct ImageInformation {
    #[serde(rename = "productFirstLineUtcTime")]
    pub product_first_line_utc_time: String,
    #[serde(rename = "azimuthTimeInterval")]
    pub azimuth_time_interval: f64,
    #[serde(rename = "rangePixelSpacing")]
    pub range_pixel_spacing: f64,
    #[serde(rename = "azimuthPixelSpacing")]
    pub azimuth_pixel_spacing: f64,
    #[serde(rename = "numberOfSamples")]
    pub number_of_samples: usize,
    #[serde(rename = "numberOfLines")]
    pub number_of_lines: usize,
}

#[derive(Debug, Deserialize)]
pub struct GeolocationGrid {
    #[serde(rename = "geolocationGridPointList")]
    pub point_list: GeolocationGridPointList,
}

#[derive(Debug, Deserialize)]
pub struct GeolocationGridPointList {
    #[serde(rename = "geolocationGridPoint", default)]
    pub points: Vec<GeolocationGridPoint>,
}

#[derive(Debug, Deserialize)]
pub struct GeolocationGridPoint {
    pub line: usize,
    pub pixel: usize,
    pub latitude: f64,
    pub longitude: f64,
    pub height: f64,
    #[serde(rename = "incidenceAngle")]
    pub incidence_angle: f64,
}

/// Tie-point grids derived from the geolocation grid
pub struct GeolocationGrids {
    pub latitude: TiePointGrid,
    pub longitude: TiePointGrid,
    pub incidence_angle: TiePointGrid,
}

/// Parser for Sentinel-1 annotation XML files
pub struct AnnotationParser;

impl AnnotationParser {
    pub fn parse_annotation(xml_content: &str) -> FloodResult<AnnotationRoot> {
        from_str::<AnnotationRoot>(xml_content)
            .map_err(|e| FloodError::XmlParsing(format!("Failed to parse annotation XML: {}", e)))
    }

    pub fn pass_direction(annotation: &AnnotationRoot) -> Option<PassDirection> {
        match annotation.general_annotation.product_information.pass.trim().to_lowercase().as_str() {
            "ascending" => Some(PassDirection::Ascending),
            "descending" => Some(PassDirection::Descending),
            _ => None,
        }
    }

    pub fn state_vectors(annotation: &AnnotationRoot) -> FloodResult<Vec<StateVector>> {
        let mut vectors = annotation
            .general_annotation
            .orbit_list
            .orbits
            .iter()
            .map(|o| {
                Ok(StateVector {
                    time: parse_utc(&o.time)?,
                    position: [o.position.x, o.position.y, o.position.z],
                    velocity: [o.velocity.x, o.velocity.y, o.velocity.z],
                })
            })
            .collect::<FloodResult<Vec<_>>>()?;
        vectors.sort_by_key(|sv| sv.time);
        Ok(vectors)
    }

    pub fn timing(annotation: &AnnotationRoot) -> FloodResult<RadarTiming> {
        let info = &annotation.image_annotation.image_information;
        Ok(RadarTiming {
            first_line_time: parse_utc(&info.product_first_line_utc_time)?,
            line_time_interval: info.azimuth_time_interval,
        })
    }

    /// Arrange the geolocation grid points into latitude/longitude/incidence tie-point grids
    pub fn geolocation_grids(annotation: &AnnotationRoot) -> FloodResult<GeolocationGrids> {
        let points = &annotation.geolocation_grid.point_list.points;
        if points.is_empty() {
            return Err(FloodError::Metadata("Annotation has no geolocation grid points".to_string()));
        }

        let mut lines: Vec<usize> = points.iter().map(|p| p.line).collect();
        let mut pixels: Vec<usize> = points.iter().map(|p| p.pixel).collect();
        lines.sort_unstable();
        lines.dedup();
        pixels.sort_unstable();
        pixels.dedup();

        let shape = (lines.len(), pixels.len());
        let mut lat = Array2::from_elem(shape, f32::NAN);
        let mut lon = Array2::from_elem(shape, f32::NAN);
        let mut inc = Array2::from_elem(shape, f32::NAN);
        for p in points {
            // both searches succeed: the keys were collected from these points
            let (Ok(r), Ok(c)) = (lines.binary_search(&p.line), pixels.binary_search(&p.pixel)) else {
                continue;
            };
            lat[[r, c]] = p.latitude as f32;
            lon[[r, c]] = p.longitude as f32;
            inc[[r, c]] = p.incidence_angle as f32;
        }
        if lat.iter().any(|v| v.is_nan()) {
            return Err(FloodError::Metadata("Geolocation grid is not rectangular".to_string()));
        }

        // Grid nodes sit on pixel centres
        let xs: Vec<f64> = pixels.iter().map(|&p| p as f64 + 0.5).collect();
        let ys: Vec<f64> = lines.iter().map(|&l| l as f64 + 0.5).collect();
        Ok(GeolocationGrids {
            latitude: TiePointGrid::new(xs.clone(), ys.clone(), lat)?,
            longitude: TiePointGrid::new(xs.clone(), ys.clone(), lon)?,
            incidence_angle: TiePointGrid::new(xs, ys, inc)?,
        })
    }
}

/// Parse the annotation timestamp format `2020-01-03T17:08:15.674828`
pub fn parse_utc(value: &str) -> FloodResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%dT%H:%M:%S%.f")
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
        .map_err(|e| FloodError::Metadata(format!("Invalid time '{}': {}", value, e)))
}
