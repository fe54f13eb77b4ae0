//! Adapters for product files, shapefiles and auxiliary data

pub mod annotation;
pub mod dem;
pub mod landcover;
pub mod orbit;
pub mod product;
pub mod sentinel1;
pub mod shapes;

// Re-export main types
pub use dem::{Dem, DemProvider, SrtmTileDirectory};
pub use landcover::{add_land_cover, GlobCoverRaster, LandCoverProvider};
pub use orbit::{OrbitDirectory, OrbitProvider, OrbitReader, OrbitType};
pub use product::{read_product, write_product};
pub use sentinel1::Sentinel1Reader;
pub use shapes::{read_shapes, Shape};
