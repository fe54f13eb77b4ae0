use crate::types::{BoundingBox, FloodError, FloodResult, GeoTransform};
use flate2::read::GzDecoder;
use gdal::Dataset;
use ndarray::Array2;
use std::io::Read;
use std::path::{Path, PathBuf};

/// No-data marker used by SRTM `.hgt` tiles
pub const SRTM_VOID: f32 = -32768.0;

/// One georeferenced elevation raster
#[derive(Debug, Clone)]
pub struct DemTile {
    pub data: Array2<f32>,
    pub transform: GeoTransform,
    pub nodata: Option<f32>,
}

impl DemTile {
    /// Bilinear elevation between pixel centres; `None` outside the tile or next to voids
    pub fn elevation_at(&self, lat: f64, lon: f64) -> Option<f64> {
        let (rows, cols) = self.data.dim();
        let col = (lon - self.transform.top_left_x) / self.transform.pixel_width - 0.5;
        let row = (lat - self.transform.top_left_y) / self.transform.pixel_height - 0.5;

        if col < 0.0 || row < 0.0 || col > (cols - 1) as f64 || row > (rows - 1) as f64 {
            return None;
        }

        let x1 = col.floor() as usize;
        let y1 = row.floor() as usize;
        let x2 = (x1 + 1).min(cols - 1);
        let y2 = (y1 + 1).min(rows - 1);
        let dx = col - x1 as f64;
        let dy = row - y1 as f64;

        let corners = [self.data[[y1, x1]], self.data[[y1, x2]], self.data[[y2, x1]], self.data[[y2, x2]]];
        if corners.iter().any(|&v| !v.is_finite() || Some(v) == self.nodata) {
            return None;
        }
        let [v11, v21, v12, v22] = corners.map(|v| v as f64);

        Some(
            v11 * (1.0 - dx) * (1.0 - dy)
                + v21 * dx * (1.0 - dy)
                + v12 * (1.0 - dx) * dy
                + v22 * dx * dy,
        )
    }
}

/// Elevation model assembled from one or more tiles
#[derive(Debug, Clone, Default)]
pub struct Dem {
    tiles: Vec<DemTile>,
}

impl Dem {
    pub fn new(tiles: Vec<DemTile>) -> Self {
        Self { tiles }
    }

    pub fn tiles(&self) -> &[DemTile] {
        &self.tiles
    }

    pub fn elevation_at(&self, lat: f64, lon: f64) -> Option<f64> {
        self.tiles.iter().find_map(|t| t.elevation_at(lat, lon))
    }
}

/// Source of elevation data for an area
pub trait DemProvider {
    fn dem_for(&self, bbox: &BoundingBox) -> FloodResult<Dem>;
}

/// Local directory of SRTM 1°x1° tiles (`N45E010.hgt`, `.hgt.gz` or `.tif`)
#[derive(Debug, Clone)]
pub struct SrtmTileDirectory {
    dir: PathBuf,
}

impl SrtmTileDirectory {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Names of the 1°x1° tiles touching a bounding box
    pub fn calculate_srtm_tiles(bbox: &BoundingBox) -> Vec<String> {
        let min_lat = bbox.min_lat.floor() as i32;
        let max_lat = bbox.max_lat.floor() as i32;
        let min_lon = bbox.min_lon.floor() as i32;
        let max_lon = bbox.max_lon.floor() as i32;

        let mut tiles = Vec::new();
        for lat in min_lat..=max_lat {
            for lon in min_lon..=max_lon {
                let lat_prefix = if lat >= 0 { "N" } else { "S" };
                let lon_prefix = if lon >= 0 { "E" } else { "W" };
                tiles.push(format!("{}{:02}{}{:03}", lat_prefix, lat.abs(), lon_prefix, lon.abs()));
            }
        }
        log::debug!("Required SRTM tiles: {:?}", tiles);
        tiles
    }

    /// South-west corner (lat, lon) encoded in a tile name
    fn parse_tile_coordinates(tile: &str) -> Option<(i32, i32)> {
        if tile.len() != 7 {
            return None;
        }
        let lat: i32 = tile.get(1..3)?.parse().ok()?;
        let lon: i32 = tile.get(4..7)?.parse().ok()?;
        let lat = match &tile[0..1] {
            "N" => lat,
            "S" => -lat,
            _ => return None,
        };
        let lon = match &tile[3..4] {
            "E" => lon,
            "W" => -lon,
            _ => return None,
        };
        Some((lat, lon))
    }

    fn load_tile(&self, tile: &str) -> FloodResult<Option<DemTile>> {
        let (lat, lon) = Self::parse_tile_coordinates(tile)
            .ok_or_else(|| FloodError::Dem(format!("Invalid SRTM tile name {}", tile)))?;

        let hgt = self.dir.join(format!("{}.hgt", tile));
        if hgt.is_file() {
            return read_hgt(&std::fs::read(&hgt)?, lat, lon).map(Some);
        }
        let gz = self.dir.join(format!("{}.hgt.gz", tile));
        if gz.is_file() {
            let data = extract_gzipped_hgt(&std::fs::read(&gz)?)?;
            return read_hgt(&data, lat, lon).map(Some);
        }
        let tif = self.dir.join(format!("{}.tif", tile));
        if tif.is_file() {
            return read_dem(&tif).map(Some);
        }
        Ok(None)
    }
}

impl DemProvider for SrtmTileDirectory {
    fn dem_for(&self, bbox: &BoundingBox) -> FloodResult<Dem> {
        if !self.dir.is_dir() {
            return Err(FloodError::Dem(format!("DEM directory {} does not exist", self.dir.display())));
        }

        use rayon::prelude::*;
        let loaded = Self::calculate_srtm_tiles(bbox)
            .par_iter()
            .map(|name| self.load_tile(name).map(|tile| (name.clone(), tile)))
            .collect::<FloodResult<Vec<_>>>()?;

        let mut tiles = Vec::with_capacity(loaded.len());
        for (name, tile) in loaded {
            match tile {
                Some(tile) => tiles.push(tile),
                None => log::warn!("SRTM tile {} not found in {}", name, self.dir.display()),
            }
        }
        if tiles.is_empty() {
            return Err(FloodError::Dem(format!(
                "No SRTM tiles in {} cover {:?}",
                self.dir.display(),
                bbox
            )));
        }
        log::info!("Loaded {} SRTM tiles", tiles.len());
        Ok(Dem::new(tiles))
    }
}

/// Read a single-band elevation raster through GDAL
pub fn read_dem<P: AsRef<Path>>(dem_path: P) -> FloodResult<DemTile> {
    log::info!("Reading DEM from: {}", dem_path.as_ref().display());

    let dataset = Dataset::open(dem_path.as_ref())?;
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value().map(|v| v as f32);
    let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
    let data = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| FloodError::Dem(format!("Failed to reshape DEM data: {}", e)))?;

    Ok(DemTile { data, transform, nodata })
}

/// Decode a raw SRTM `.hgt` tile: square grid of big-endian i16, pixel-is-point at whole degrees
pub fn read_hgt(bytes: &[u8], lat: i32, lon: i32) -> FloodResult<DemTile> {
    let samples = bytes.len() / 2;
    let size = (samples as f64).sqrt().round() as usize;
    if size < 2 || size * size * 2 != bytes.len() {
        return Err(FloodError::Dem(format!("Unexpected HGT size of {} bytes", bytes.len())));
    }

    let values: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|b| i16::from_be_bytes([b[0], b[1]]) as f32)
        .collect();
    let data = Array2::from_shape_vec((size, size), values)
        .map_err(|e| FloodError::Dem(format!("Failed to reshape HGT data: {}", e)))?;

    let step = 1.0 / (size - 1) as f64;
    let transform = GeoTransform {
        top_left_x: lon as f64 - step / 2.0,
        pixel_width: step,
        rotation_x: 0.0,
        top_left_y: (lat + 1) as f64 + step / 2.0,
        rotation_y: 0.0,
        pixel_height: -step,
    };
    Ok(DemTile { data, transform, nodata: Some(SRTM_VOID) })
}

fn extract_gzipped_hgt(gzip_data: &[u8]) -> FloodResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(gzip_data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| FloodError::Dem(format!("Failed to decompress gzip data: {}", e)))?;
    if decompressed.is_empty() {
        return Err(FloodError::Dem("Decompressed HGT file is empty".to_string()));
    }
    Ok(decompressed)
}
