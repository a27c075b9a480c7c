pub mod arcgis;
pub mod browser;
pub mod connectors;
pub mod debug;
pub mod energov;
pub mod exports;
pub mod jurisdictions;
pub mod models;
pub mod normalize;
pub mod parcels;
pub mod permits;
pub mod scanner;
pub mod tui;
