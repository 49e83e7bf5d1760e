//! Product metadata, auxiliary files and orbit handling

pub mod aux_file;
pub mod metadata;
pub mod orbit;
pub mod radarsat2_lut;

pub use aux_file::{find_latest_xca_file, resolve_named_aux_file, AuxiliaryData};
pub use metadata::{AttributeValue, BandInfo, ProductMetadata};
pub use radarsat2_lut::{install_luts_from_dir, Radarsat2Lut};
