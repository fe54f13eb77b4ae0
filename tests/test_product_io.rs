use ndarray::array;

use sarflood::core::geocoding::Geocoding;
use sarflood::{read_product, write_product, Band, FloodError, Product, SarMetadata, ScalarType};

fn mask_product() -> Product {
    let mut p = Product::new("mask", 3, 2, Geocoding::geographic(16.0, 48.2, 0.0001), SarMetadata::default());
    p.add_band(Band::new("flooded", ScalarType::Uint8, array![[1.0, 0.0, 1.0], [0.0, 0.0, 1.0]]))
        .unwrap();
    p.add_band(Band::new("BinaryWater", ScalarType::Uint8, array![[1.0, 1.0, 0.0], [1.0, 1.0, 1.0]]))
        .unwrap();
    p
}

#[test]
fn test_write_then_read_uint8_product() {
    sarflood::init();
    let dir = tempfile::tempdir().unwrap();

    let written = write_product(&mask_product(), dir.path().join("result"), "GeoTIFF").unwrap();
    assert_eq!(written, dir.path().join("result.tif"));
    assert!(written.is_file());
    // only the final file remains
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

    let read = read_product(&written).unwrap();
    assert_eq!((read.width, read.height), (3, 2));
    assert_eq!(read.band_names(), vec!["flooded", "BinaryWater"]);
    let flooded = read.band("flooded").unwrap();
    assert_eq!(flooded.data_type, ScalarType::Uint8);
    assert_eq!(flooded.no_data_value, None);
    assert_eq!(flooded.data.as_ref(), &array![[1.0f32, 0.0, 1.0], [0.0, 0.0, 1.0]]);
    assert!(read.geocoding.is_map_geometry());
}

#[test]
fn test_mixed_types_are_written_as_float() {
    sarflood::init();
    let dir = tempfile::tempdir().unwrap();
    let mut product = mask_product();
    product
        .add_band(Band::new("Sigma0_VV", ScalarType::Float32, array![[0.01, 0.2, 0.003], [0.5, 0.02, 0.04]]))
        .unwrap();

    let written = write_product(&product, dir.path().join("mixed.tif"), "GeoTIFF").unwrap();
    let read = read_product(&written).unwrap();
    let sigma0 = read.band("Sigma0_VV").unwrap();
    assert_eq!(sigma0.data_type, ScalarType::Float32);
    assert_eq!(sigma0.data[[1, 0]], 0.5);
    assert_eq!(read.band("flooded").unwrap().data[[0, 2]], 1.0);
}

#[test]
fn test_mask_zeros_stay_valid_next_to_other_no_data_bands() {
    sarflood::init();
    let dir = tempfile::tempdir().unwrap();
    let mut product = mask_product();
    product
        .add_band(
            Band::new("Sigma0_VV", ScalarType::Float32, array![[0.01, f32::NAN, 0.003], [0.5, 0.02, 0.04]])
                .with_no_data(f64::NAN),
        )
        .unwrap();
    product
        .add_band(
            Band::new("land_cover_GlobCover", ScalarType::Uint8, array![[210.0, 230.0, 14.0], [210.0, 210.0, 30.0]])
                .with_no_data(230.0),
        )
        .unwrap();

    let written = write_product(&product, dir.path().join("result"), "GeoTIFF").unwrap();
    let read = read_product(&written).unwrap();
    for band in read.bands() {
        assert_eq!(band.no_data_value, None, "band {}", band.name);
    }
    let flooded = read.band("flooded").unwrap();
    assert_eq!(flooded.data.iter().filter(|&&v| v == 0.0).count(), 3);
    assert_eq!(read.band("BinaryWater").unwrap().data[[0, 2]], 0.0);
}

#[test]
fn test_shared_no_data_is_kept() {
    sarflood::init();
    let dir = tempfile::tempdir().unwrap();
    let mut product = Product::new("lc", 2, 1, Geocoding::geographic(16.0, 48.2, 0.01), SarMetadata::default());
    product
        .add_band(Band::new("land_cover_GlobCover", ScalarType::Uint8, array![[210.0, 230.0]]).with_no_data(230.0))
        .unwrap();

    let written = write_product(&product, dir.path().join("lc"), "GeoTIFF").unwrap();
    let read = read_product(&written).unwrap();
    assert_eq!(read.band("land_cover_GlobCover").unwrap().no_data_value, Some(230.0));
}

#[test]
fn test_write_errors() {
    sarflood::init();
    let dir = tempfile::tempdir().unwrap();

    let err = write_product(&mask_product(), dir.path().join("out"), "BEAM-DIMAP").unwrap_err();
    assert!(matches!(err, FloodError::ProductWrite { .. }));

    let empty = Product::new("empty", 2, 2, Geocoding::geographic(16.0, 48.2, 0.01), SarMetadata::default());
    let err = write_product(&empty, dir.path().join("out"), "GeoTIFF").unwrap_err();
    assert!(matches!(err, FloodError::ProductWrite { .. }));

    let err = write_product(&mask_product(), dir.path().join("missing/dir/out"), "GeoTIFF").unwrap_err();
    assert!(matches!(err, FloodError::ProductWrite { .. }));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_unreadable_product() {
    sarflood::init();
    let err = read_product("/nonexistent/S1A_IW_GRDH.zip").unwrap_err();
    assert!(matches!(err, FloodError::ProductRead { .. }));
}
