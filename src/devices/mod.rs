pub mod decoder;
pub mod dtsu666;
pub mod mapper;
pub mod plausibility;
pub mod register_map;
pub mod traits;

pub use decoder::{DecodedValue, PayloadDecoder};
pub use dtsu666::Dtsu666;
pub use mapper::MappedMeasurement;
pub use plausibility::PlausibilityFilter;
pub use register_map::{RegisterDef, RegisterMap};
pub use traits::{meter_for_model, Meter};
