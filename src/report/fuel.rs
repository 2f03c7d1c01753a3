use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Coarse category for a fuel or interchange row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubType {
    Fossil,
    Renewable,
    Storage,
    Biomass,
    Interchange,
    Unknown,
}

impl SubType {
    pub fn as_str(self) -> &'static str {
        match self {
            SubType::Fossil => "Fossil",
            SubType::Renewable => "Renewable",
            SubType::Storage => "Storage",
            SubType::Biomass => "Biomass",
            SubType::Interchange => "Interchange",
            SubType::Unknown => "Unknown",
        }
    }

    /// Inverse of `as_str`; anything unrecognized comes back as `Unknown`.
    pub fn parse(s: &str) -> SubType {
        match s.trim() {
            "Fossil" => SubType::Fossil,
            "Renewable" => SubType::Renewable,
            "Storage" => SubType::Storage,
            "Biomass" => SubType::Biomass,
            "Interchange" => SubType::Interchange,
            _ => SubType::Unknown,
        }
    }
}

/// Static fuel-label table, keyed by the uppercased label as it appears in
/// the report's generation summary.
static FUEL_TABLE: Lazy<HashMap<&'static str, SubType>> = Lazy::new(|| {
    HashMap::from([
        ("GAS", SubType::Fossil),
        ("DUAL FUEL", SubType::Fossil),
        ("COAL", SubType::Fossil),
        ("SOLAR", SubType::Renewable),
        ("WIND", SubType::Renewable),
        ("HYDRO", SubType::Renewable),
        ("ENERGY STORAGE", SubType::Storage),
        ("OTHER", SubType::Biomass),
    ])
});

/// Classify a raw row label. Total: every input yields a canonical type
/// (the trimmed label, qualifiers preserved) and a subtype; labels outside
/// the table surface as `Unknown` rather than being dropped.
pub fn classify(raw_label: &str) -> (String, SubType) {
    let label = raw_label.trim();
    let key = label.to_uppercase();
    let sub_type = match FUEL_TABLE.get(key.as_str()) {
        Some(&s) => s,
        None if key.contains("INTERCHANGE") => SubType::Interchange,
        None => SubType::Unknown,
    };
    (label.to_string(), sub_type)
}

/// Whether `label` is one of the known generation fuel names. Used as the
/// content anchor when locating the data table inside a report.
pub fn is_known_fuel(label: &str) -> bool {
    FUEL_TABLE.contains_key(label.trim().to_uppercase().as_str())
}
