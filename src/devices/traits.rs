use super::register_map::RegisterMap;
use crate::utils::error::SnifferError;

/// A meter family the sniffer knows how to interpret.
pub trait Meter: Send + Sync {
    fn model(&self) -> &str;
    fn description(&self) -> &str;
    fn register_map(&self) -> Result<RegisterMap, SnifferError>;
}

/// Looks up a built-in meter profile by (case-insensitive) model name.
pub fn meter_for_model(model: &str) -> Option<Box<dyn Meter>> {
    match model.to_ascii_lowercase().as_str() {
        "dtsu666" => Some(Box::new(super::dtsu666::Dtsu666)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_lookup() {
        assert_eq!(meter_for_model("DTSU666").unwrap().model(), "DTSU666");
        assert!(meter_for_model("sdm630").is_none());
    }
}
