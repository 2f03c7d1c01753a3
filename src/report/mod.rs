// src/report/mod.rs

pub mod fuel;
pub mod parse;
pub mod record;

pub use fuel::SubType;
pub use parse::{parse_report, ParsedReport, RowCandidate};
pub use record::{build, CanonicalRecord};
