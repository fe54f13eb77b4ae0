//! Flood monitoring from a Sentinel-1 product and a region-of-interest shapefile.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use sarflood::io::{GlobCoverRaster, OrbitDirectory, SrtmTileDirectory};
use sarflood::{
    load_roi, read_product, write_product, DataSources, FloodMaskOrchestrator, FloodMaskParams, ProcessingStage,
    Product, RadiometricPipeline, RoiConstruction,
};

#[derive(Parser, Debug)]
#[command(name = "sarflood")]
#[command(about = "EO Flood Monitoring")]
struct Args {
    /// Sentinel 1 data product archive
    #[arg(long = "product-path", value_name = "PRODUCT")]
    product_path: PathBuf,

    /// Shape file in .shp format
    #[arg(long = "shape-path", value_name = "SHAPE")]
    shape_path: PathBuf,

    /// Path to resulting TIF file (w/o .tif)
    #[arg(long = "result-path", value_name = "RESULT")]
    result_path: PathBuf,

    /// Directory of precise orbit files [env: SARFLOOD_ORBIT_DIR]
    #[arg(long)]
    orbit_dir: Option<PathBuf>,

    /// Directory of SRTM 3 arc-second tiles [env: SARFLOOD_DEM_DIR]
    #[arg(long)]
    dem_dir: Option<PathBuf>,

    /// GlobCover GeoTIFF [env: SARFLOOD_LANDCOVER]
    #[arg(long)]
    land_cover_path: Option<PathBuf>,

    /// How shapefile vertices become the region of interest (convex-hull or point-order)
    #[arg(long, default_value = "convex-hull")]
    roi_mode: RoiConstruction,
}

fn show_product_information(product: &Product) {
    println!("{}", product.summary());
}

fn data_sources(args: &Args) -> DataSources {
    let mut sources = DataSources::from_env();
    if let Some(dir) = &args.orbit_dir {
        sources.orbit_dir = dir.clone();
    }
    if let Some(dir) = &args.dem_dir {
        sources.dem_dir = dir.clone();
    }
    if let Some(path) = &args.land_cover_path {
        sources.land_cover_path = path.clone();
    }
    sources
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    sarflood::init();
    let sources = data_sources(&args);

    let roi = load_roi(&args.shape_path, args.roi_mode)?;

    let product = read_product(&args.product_path)?;
    show_product_information(&product);

    let pipeline = RadiometricPipeline::new(
        Box::new(OrbitDirectory::new(&sources.orbit_dir)),
        Box::new(SrtmTileDirectory::new(&sources.dem_dir)),
        roi,
    );
    let preprocessed = pipeline.run_with(&product, |stage, intermediate| {
        if stage == ProcessingStage::SpatialSubset {
            show_product_information(intermediate);
        }
    })?;

    let orchestrator = FloodMaskOrchestrator::new(
        FloodMaskParams::default(),
        Box::new(GlobCoverRaster::new(&sources.land_cover_path)),
    );
    let masked = orchestrator.run(&preprocessed)?;

    println!("writing product ...");
    let written = write_product(&masked, &args.result_path, "GeoTIFF")
        .with_context(|| format!("writing {}", args.result_path.display()))?;
    log::info!("Result written to {}", written.display());
    println!("done.");
    Ok(())
}
