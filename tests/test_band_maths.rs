use approx::assert_relative_eq;
use ndarray::{array, Array2};

use sarflood::core::band_maths::{Expression, ExpressionError};
use sarflood::core::geocoding::Geocoding;
use sarflood::{apply_band_maths, Band, BandDescriptor, FloodError, Product, SarMetadata, ScalarType};

fn product() -> Product {
    let mut p = Product::new("bm", 3, 2, Geocoding::geographic(10.0, 45.0, 0.01), SarMetadata::default());
    p.add_band(Band::new("a", ScalarType::Float32, array![[1.0, 2.0, 3.0], [4.0, f32::NAN, 0.0]]))
        .unwrap();
    p.add_band(Band::new("b", ScalarType::Float32, array![[2.0, 2.0, 2.0], [8.0, 1.0, 0.0]]))
        .unwrap();
    p
}

fn values(p: &Product, name: &str) -> Vec<f32> {
    p.band(name).unwrap().data.iter().copied().collect()
}

#[test]
fn test_descriptors_see_only_input_bands() {
    let p = product();
    let out = apply_band_maths(
        &p,
        &[
            BandDescriptor::new("sum", ScalarType::Float32, "a + b"),
            BandDescriptor::new("twice", ScalarType::Float32, "sum * 2"),
        ],
    );
    assert!(matches!(out, Err(FloodError::Expression(ExpressionError::UnknownBand(ref n))) if n == "sum"));
    assert_eq!(p.band_names(), vec!["a", "b"]);
}

#[test]
fn test_nan_results_take_the_no_data_value() {
    let p = product();
    let mut ratio = BandDescriptor::new("ratio", ScalarType::Float32, "a / b");
    ratio.no_data_value = Some(-1.0);
    let out = apply_band_maths(&p, &[ratio]).unwrap();

    let ratio = values(&out, "ratio");
    assert_relative_eq!(ratio[0], 0.5);
    assert_relative_eq!(ratio[3], 0.5);
    assert_eq!(ratio[4], -1.0);
    // 0 / 0
    assert_eq!(ratio[5], -1.0);
    assert_eq!(out.band("ratio").unwrap().no_data_value, Some(-1.0));
}

#[test]
fn test_integer_targets_round_and_clamp() {
    let p = product();
    let out = apply_band_maths(
        &p,
        &[
            BandDescriptor::new("scaled", ScalarType::Uint8, "a * 100 - 150"),
            BandDescriptor::new("mask", ScalarType::Uint8, "a > 1.5 && b < 3 ? 1 : 0"),
        ],
    )
    .unwrap();

    assert_eq!(values(&out, "scaled"), vec![0.0, 50.0, 150.0, 250.0, 0.0, 0.0]);
    assert_eq!(values(&out, "mask"), vec![0.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
    assert_eq!(out.band("mask").unwrap().data_type, ScalarType::Uint8);
}

#[test]
fn test_existing_band_is_replaced_in_place() {
    let p = product();
    let out = apply_band_maths(&p, &[BandDescriptor::new("a", ScalarType::Float32, "b - 1")]).unwrap();
    assert_eq!(out.band_names(), vec!["a", "b"]);
    assert_eq!(values(&out, "a"), vec![1.0, 1.0, 1.0, 7.0, 0.0, -1.0]);
    assert_relative_eq!(values(&p, "a")[0], 1.0);
}

#[test]
fn test_nan_comparisons() {
    let p = product();
    let out = apply_band_maths(
        &p,
        &[
            BandDescriptor::new("eq", ScalarType::Uint8, "a == a"),
            BandDescriptor::new("ne", ScalarType::Uint8, "a != a"),
            BandDescriptor::new("if", ScalarType::Float32, "if a >= 3 then a else NaN"),
        ],
    )
    .unwrap();

    assert_eq!(values(&out, "eq"), vec![1.0, 1.0, 1.0, 1.0, 0.0, 1.0]);
    assert_eq!(values(&out, "ne"), vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    let conditional = values(&out, "if");
    assert!(conditional[0].is_nan());
    assert_eq!(conditional[2], 3.0);
    assert_eq!(conditional[3], 4.0);
}

#[test]
fn test_dimension_mismatch_is_reported() {
    let mut p = product();
    let err = p
        .add_band(Band::new("c", ScalarType::Float32, Array2::zeros((3, 3))))
        .unwrap_err();
    assert!(matches!(err, FloodError::InvalidBand(_)));
}

#[test]
fn test_parse_failures() {
    assert!(matches!(Expression::parse("a +"), Err(ExpressionError::Parse { .. })));
    assert!(matches!(Expression::parse("(a + b"), Err(ExpressionError::Parse { .. })));
    assert!(matches!(Expression::parse("foo(a)"), Err(ExpressionError::UnknownFunction(_))));
    assert!(matches!(Expression::parse("pow(a)"), Err(ExpressionError::Arity { expected: 2, found: 1, .. })));
    assert_eq!(Expression::parse("a * b + a").unwrap().bands, vec!["a".to_string(), "b".to_string()]);
}
