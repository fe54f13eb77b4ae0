use approx::assert_relative_eq;
use chrono::{Duration, TimeZone, Utc};
use std::fs;
use std::io::Write;

use sarflood::io::orbit::{OrbitDirectory, OrbitProvider, OrbitReader, OrbitType};
use sarflood::FloodError;

/// Earth Explorer orbit file with `count` vectors, 10 s apart, moving linearly in x
fn eof_content(count: usize) -> String {
    let t0 = Utc.with_ymd_and_hms(2021, 7, 15, 5, 29, 0).unwrap();
    let mut osvs = String::new();
    for i in 0..count {
        let t = t0 + Duration::seconds(i as i64 * 10);
        let x = 4_500_000.0 + 7000.0 * (i as f64 * 10.0);
        osvs.push_str(&format!(
            "      <OSV>\n\
             \x20       <TAI>TAI={tai}</TAI>\n\
             \x20       <UTC>UTC={utc}</UTC>\n\
             \x20       <Absolute_Orbit>+38777</Absolute_Orbit>\n\
             \x20       <X unit=\"m\">{x:.6}</X>\n\
             \x20       <Y unit=\"m\">800000.000000</Y>\n\
             \x20       <Z unit=\"m\">5000000.000000</Z>\n\
             \x20       <VX unit=\"m/s\">7000.000000</VX>\n\
             \x20       <VY unit=\"m/s\">0.000000</VY>\n\
             \x20       <VZ unit=\"m/s\">0.000000</VZ>\n\
             \x20       <Quality>NOMINAL</Quality>\n\
             \x20     </OSV>\n",
            tai = (t + Duration::seconds(37)).format("%Y-%m-%dT%H:%M:%S%.6f"),
            utc = t.format("%Y-%m-%dT%H:%M:%S%.6f"),
            x = x,
        ));
    }
    format!(
        "<?xml version=\"1.0\" ?>\n<Earth_Explorer_File>\n  <Data_Block type=\"xml\">\n    <List_of_OSVs count=\"{}\">\n{}    </List_of_OSVs>\n  </Data_Block>\n</Earth_Explorer_File>\n",
        count, osvs
    )
}

const ORBIT_NAME: &str = "S1A_OPER_AUX_POEORB_OPOD_20210804T121234_V20210714T225942_20210716T005942.EOF";

#[test]
fn test_parse_state_vectors() {
    let _ = env_logger::builder().is_test(true).try_init();
    let orbit = OrbitReader::parse_eof_content(&eof_content(12)).unwrap();

    assert_eq!(orbit.state_vectors.len(), 12);
    assert_eq!(orbit.reference_time, Utc.with_ymd_and_hms(2021, 7, 15, 5, 29, 0).unwrap());
    assert_relative_eq!(orbit.state_vectors[3].position[0], 4_710_000.0);
    assert_relative_eq!(orbit.state_vectors[3].velocity[0], 7000.0);

    let t = orbit.reference_time + Duration::milliseconds(45_250);
    let pos = OrbitReader::interpolate_position(&orbit, t, 3).unwrap();
    assert_relative_eq!(pos[0], 4_500_000.0 + 7000.0 * 45.25, epsilon = 1e-3);
    assert_relative_eq!(pos[2], 5_000_000.0, epsilon = 1e-6);
}

#[test]
fn test_content_without_vectors_is_rejected() {
    let err = OrbitReader::parse_eof_content("<Earth_Explorer_File></Earth_Explorer_File>").unwrap_err();
    assert!(matches!(err, FloodError::Orbit(_)));
}

#[test]
fn test_directory_picks_the_covering_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(ORBIT_NAME), eof_content(12)).unwrap();
    // wrong mission and wrong validity window
    fs::write(dir.path().join(ORBIT_NAME.replacen("S1A", "S1B", 1)), eof_content(3)).unwrap();
    fs::write(
        dir.path().join("S1A_OPER_AUX_POEORB_OPOD_20210704T121234_V20210614T225942_20210616T005942.EOF"),
        eof_content(3),
    )
    .unwrap();

    let provider = OrbitDirectory::new(dir.path());
    let start = Utc.with_ymd_and_hms(2021, 7, 15, 5, 30, 0).unwrap();
    let orbit = provider
        .orbit_for("S1A", OrbitType::POEORB, start, start + Duration::seconds(25))
        .unwrap();
    assert_eq!(orbit.state_vectors.len(), 12);

    let err = provider
        .orbit_for("S1A", OrbitType::RESORB, start, start + Duration::seconds(25))
        .unwrap_err();
    assert!(matches!(err, FloodError::Orbit(_)));
}

#[test]
fn test_zipped_orbit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("{}.zip", ORBIT_NAME));
    let mut zip = zip::ZipWriter::new(fs::File::create(&path).unwrap());
    zip.start_file(ORBIT_NAME, zip::write::FileOptions::default()).unwrap();
    zip.write_all(eof_content(6).as_bytes()).unwrap();
    zip.finish().unwrap();

    let orbit = OrbitReader::read_orbit_file(&path).unwrap();
    assert_eq!(orbit.state_vectors.len(), 6);

    let start = Utc.with_ymd_and_hms(2021, 7, 15, 5, 30, 0).unwrap();
    let from_dir = OrbitDirectory::new(dir.path())
        .orbit_for("S1A", OrbitType::POEORB, start, start)
        .unwrap();
    assert_eq!(from_dir.state_vectors.len(), 6);
}

#[test]
fn test_missing_directory() {
    let start = Utc.with_ymd_and_hms(2021, 7, 15, 5, 30, 0).unwrap();
    let err = OrbitDirectory::new("/nonexistent/orbits")
        .orbit_for("S1A", OrbitType::POEORB, start, start)
        .unwrap_err();
    assert!(matches!(err, FloodError::Orbit(_)));
}
