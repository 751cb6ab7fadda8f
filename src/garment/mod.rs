pub mod catalog;
pub mod preprocess;

pub use catalog::{CatalogError, GarmentCatalog};
pub use preprocess::{preprocess_garments, BodyMeasurements, PreprocessReport};
