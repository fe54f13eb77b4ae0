use crate::core::geocoding::{Geocoding, PixelPos};
use crate::io::sentinel1::Sentinel1Reader;
use crate::types::{Band, FloodError, FloodResult, GeoTransform, Product, SarMetadata, ScalarType};
use gdal::raster::{Buffer, GdalDataType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::{Array2, Zip};
use num_complex::Complex;
use std::path::{Path, PathBuf};

/// Output formats understood by [`write_product`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductFormat {
    GeoTiff,
}

impl std::str::FromStr for ProductFormat {
    type Err = FloodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "geotiff" | "gtiff" | "tif" | "tiff" => Ok(ProductFormat::GeoTiff),
            other => Err(FloodError::InvalidFormat(format!("Unsupported output format: {}", other))),
        }
    }
}

/// Read a product from disk: Sentinel-1 archives/SAFE folders or any GDAL raster in geographic coordinates
pub fn read_product<P: AsRef<Path>>(path: P) -> FloodResult<Product> {
    let path = path.as_ref();
    log::info!("Reading product {}", path.display());

    let result = if Sentinel1Reader::is_sentinel1(path) {
        Sentinel1Reader::open(path).and_then(|mut reader| reader.read_product())
    } else {
        read_gdal_raster(path)
    };

    result.map_err(|e| match e {
        already @ FloodError::ProductRead { .. } => already,
        other => FloodError::ProductRead { path: path.to_path_buf(), reason: other.to_string() },
    })
}

/// Generic raster read; bands are named after their descriptions
fn read_gdal_raster(path: &Path) -> FloodResult<Product> {
    let dataset = Dataset::open(path)?;
    let (width, height) = dataset.raster_size();

    let srs = dataset
        .spatial_ref()
        .map_err(|_| FloodError::InvalidFormat("Raster has no coordinate reference system".to_string()))?;
    if !srs.is_geographic() {
        return Err(FloodError::InvalidFormat(
            "Only rasters in geographic (lat/lon) coordinates are supported".to_string(),
        ));
    }
    let geocoding = Geocoding::Map {
        crs_wkt: srs.to_wkt()?,
        transform: GeoTransform::from_gdal(dataset.geo_transform()?),
    };

    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("product").to_string();
    let metadata = SarMetadata { product_id: name.clone(), ..Default::default() };
    let mut product = Product::new(name, width, height, geocoding, metadata);

    for index in 1..=dataset.raster_count() {
        let rasterband = dataset.rasterband(index)?;
        let description = rasterband.description().unwrap_or_default();
        let band_name = if description.trim().is_empty() {
            format!("band_{}", index)
        } else {
            description.trim().to_string()
        };
        let data_type = match rasterband.band_type() {
            GdalDataType::UInt8 => ScalarType::Uint8,
            GdalDataType::Int16 => ScalarType::Int16,
            GdalDataType::UInt16 => ScalarType::Uint16,
            _ => ScalarType::Float32,
        };

        let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
        let data = Array2::from_shape_vec((height, width), buffer.data)
            .map_err(|e| FloodError::InvalidFormat(format!("Failed to reshape band {}: {}", band_name, e)))?;

        let mut band = Band::new(band_name, data_type, data);
        band.no_data_value = rasterband.no_data_value();
        product.add_band(band)?;
    }

    add_complex_intensities(&mut product)?;
    log::debug!("Read {} bands from {}", product.bands().len(), path.display());
    Ok(product)
}

/// Derive `Intensity_<POL>` = |i + jq|² for every `i_<POL>`/`q_<POL>` pair
fn add_complex_intensities(product: &mut Product) -> FloodResult<()> {
    let pairs: Vec<(String, Band, Band)> = product
        .bands()
        .iter()
        .filter_map(|b| {
            let suffix = b.name.strip_prefix("i_")?;
            let q = product.band(&format!("q_{}", suffix))?;
            Some((suffix.to_string(), b.clone(), q.clone()))
        })
        .collect();

    for (suffix, i_band, q_band) in pairs {
        let intensity = Zip::from(i_band.data.as_ref())
            .and(q_band.data.as_ref())
            .par_map_collect(|&i, &q| Complex::new(i, q).norm_sqr());
        let band = Band::new(format!("Intensity_{}", suffix), ScalarType::Float32, intensity).with_unit("intensity");
        product.add_band_if_absent(&band)?;
    }
    Ok(())
}

/// Write every band of a product into one file, returning the path written.
/// The data goes to a temporary sibling first so a failed write leaves nothing behind.
pub fn write_product<P: AsRef<Path>>(product: &Product, path: P, format: &str) -> FloodResult<PathBuf> {
    let requested = path.as_ref();
    let write_error = |reason: String| FloodError::ProductWrite { path: requested.to_path_buf(), reason };

    let ProductFormat::GeoTiff = format.parse::<ProductFormat>().map_err(|e| write_error(e.to_string()))?;
    if product.bands().is_empty() {
        return Err(write_error("product has no bands".to_string()));
    }

    let target = with_tif_extension(requested);
    let directory = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let temp = tempfile::Builder::new()
        .prefix(".sarflood-")
        .suffix(".tif")
        .tempfile_in(&directory)
        .map_err(|e| write_error(e.to_string()))?;

    write_geotiff(product, temp.path()).map_err(|e| write_error(e.to_string()))?;
    temp.persist(&target).map_err(|e| write_error(e.to_string()))?;

    log::info!("Wrote {} bands to {}", product.bands().len(), target.display());
    Ok(target)
}

fn with_tif_extension(path: &Path) -> PathBuf {
    let has_tif = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"));
    if has_tif {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_os_string();
        name.push(".tif");
        PathBuf::from(name)
    }
}

/// Affine transform matching the product's geocoding; radar geometry is approximated from its corners
fn output_transform(product: &Product) -> GeoTransform {
    match &product.geocoding {
        Geocoding::Map { transform, .. } => *transform,
        geocoding @ Geocoding::TiePoint { .. } => {
            log::warn!("Product is in radar geometry; writing an affine approximation of its geocoding");
            let origin = geocoding.pixel_to_geo(PixelPos { x: 0.0, y: 0.0 });
            let right = geocoding.pixel_to_geo(PixelPos { x: product.width as f64, y: 0.0 });
            let down = geocoding.pixel_to_geo(PixelPos { x: 0.0, y: product.height as f64 });
            GeoTransform {
                top_left_x: origin.lon,
                pixel_width: (right.lon - origin.lon) / product.width as f64,
                rotation_x: (down.lon - origin.lon) / product.height as f64,
                top_left_y: origin.lat,
                rotation_y: (right.lat - origin.lat) / product.width as f64,
                pixel_height: (down.lat - origin.lat) / product.height as f64,
            }
        }
    }
}

fn write_geotiff(product: &Product, path: &Path) -> FloodResult<()> {
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (width, height) = (product.width, product.height);
    let band_count = product.bands().len() as isize;
    let all_uint8 = product.bands().iter().all(|b| b.data_type == ScalarType::Uint8);

    let mut dataset = if all_uint8 {
        driver.create_with_band_type::<u8, _>(path, width as isize, height as isize, band_count)?
    } else {
        driver.create_with_band_type::<f32, _>(path, width as isize, height as isize, band_count)?
    };

    let no_data = dataset_no_data(product, all_uint8);
    dataset.set_geo_transform(&output_transform(product).to_gdal())?;
    let srs = match &product.geocoding {
        Geocoding::Map { crs_wkt, .. } => SpatialRef::from_wkt(crs_wkt)?,
        Geocoding::TiePoint { .. } => SpatialRef::from_epsg(4326)?,
    };
    dataset.set_spatial_ref(&srs)?;

    for (index, band) in product.bands().iter().enumerate() {
        let mut rasterband = dataset.rasterband(index as isize + 1)?;
        if all_uint8 {
            let data: Vec<u8> = band.data.iter().map(|&v| v.clamp(0.0, 255.0) as u8).collect();
            rasterband.write((0, 0), (width, height), &Buffer::new((width, height), data))?;
        } else {
            let data: Vec<f32> = band.data.iter().copied().collect();
            rasterband.write((0, 0), (width, height), &Buffer::new((width, height), data))?;
        }
        rasterband.set_description(&band.name)?;
        if let Some(nd) = no_data {
            rasterband.set_no_data_value(Some(nd))?;
        }
    }
    Ok(())
}

/// No-data value for the whole file: GeoTIFF keeps one per dataset, so it is only
/// written when every band declares the same value and it fits the output type.
fn dataset_no_data(product: &Product, all_uint8: bool) -> Option<f64> {
    let mut values = product.bands().iter().map(|b| b.no_data_value);
    let first = values.next()??;
    let same = |v: Option<f64>| v.map_or(false, |v| v == first || (v.is_nan() && first.is_nan()));
    if !values.all(same) {
        if product.bands().iter().any(|b| b.no_data_value.is_some()) {
            log::debug!("Bands of '{}' declare different no-data values, none written", product.name);
        }
        return None;
    }
    if all_uint8 && !(first.is_finite() && (0.0..=255.0).contains(&first)) {
        return None;
    }
    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tif_extension_appended() {
        assert_eq!(with_tif_extension(Path::new("out/result")), PathBuf::from("out/result.tif"));
        assert_eq!(with_tif_extension(Path::new("out/result.TIF")), PathBuf::from("out/result.TIF"));
        assert_eq!(with_tif_extension(Path::new("out/res.v2")), PathBuf::from("out/res.v2.tif"));
    }

    #[test]
    fn test_dataset_no_data_only_when_bands_agree() {
        let band = |name: &str, data_type: ScalarType, no_data: Option<f64>| {
            let mut b = Band::new(name, data_type, Array2::zeros((2, 2)));
            b.no_data_value = no_data;
            b
        };
        let mut product = Product::new("p", 2, 2, Geocoding::geographic(10.0, 45.0, 0.01), SarMetadata::default());
        product.add_band(band("Sigma0_VV", ScalarType::Float32, Some(f64::NAN))).unwrap();
        assert!(dataset_no_data(&product, false).unwrap().is_nan());

        product.add_band(band("flooded", ScalarType::Uint8, None)).unwrap();
        assert_eq!(dataset_no_data(&product, false), None);

        let mut land_cover = Product::new("lc", 2, 2, Geocoding::geographic(10.0, 45.0, 0.01), SarMetadata::default());
        land_cover.add_band(band("land_cover_GlobCover", ScalarType::Uint8, Some(230.0))).unwrap();
        assert_eq!(dataset_no_data(&land_cover, true), Some(230.0));
        land_cover.add_band(band("BinaryWater", ScalarType::Uint8, Some(300.0))).unwrap();
        assert_eq!(dataset_no_data(&land_cover, true), None);
    }

    #[test]
    fn test_format_names() {
        assert_eq!("GeoTIFF".parse::<ProductFormat>().unwrap(), ProductFormat::GeoTiff);
        assert!("BEAM-DIMAP".parse::<ProductFormat>().is_err());
    }
}
