//! Locations of the auxiliary data used by the pipeline.

use std::path::PathBuf;

pub const ORBIT_DIR_VAR: &str = "SARFLOOD_ORBIT_DIR";
pub const DEM_DIR_VAR: &str = "SARFLOOD_DEM_DIR";
pub const LAND_COVER_VAR: &str = "SARFLOOD_LANDCOVER";

const GLOBCOVER_FILE: &str = "GLOBCOVER_L4_200901_200912_V2.3.tif";

/// Local orbit files, SRTM tiles and land-cover raster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSources {
    pub orbit_dir: PathBuf,
    pub dem_dir: PathBuf,
    pub land_cover_path: PathBuf,
}

impl Default for DataSources {
    fn default() -> Self {
        let root = dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("sarflood");
        Self {
            orbit_dir: root.join("orbits"),
            dem_dir: root.join("srtm_3sec"),
            land_cover_path: root.join("globcover").join(GLOBCOVER_FILE),
        }
    }
}

impl DataSources {
    /// Defaults overridden by the `SARFLOOD_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut sources = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from);
        if let Some(dir) = non_empty(ORBIT_DIR_VAR) {
            sources.orbit_dir = dir;
        }
        if let Some(dir) = non_empty(DEM_DIR_VAR) {
            sources.dem_dir = dir;
        }
        if let Some(path) = non_empty(LAND_COVER_VAR) {
            sources.land_cover_path = path;
        }
        log::debug!("Data sources: {:?}", sources);
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_overrides() {
        let sources = DataSources::from_lookup(|key| match key {
            DEM_DIR_VAR => Some("/data/srtm".to_string()),
            ORBIT_DIR_VAR => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(sources.dem_dir, PathBuf::from("/data/srtm"));
        assert_eq!(sources.orbit_dir, DataSources::default().orbit_dir);
        assert!(sources.land_cover_path.ends_with(GLOBCOVER_FILE));
    }
}
