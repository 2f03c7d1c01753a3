//! Scraper for AESO "Current Supply Demand" report exports: parses each
//! report into canonical generation/interchange records and merges them
//! into one deduplicated CSV dataset per calendar month.

pub mod fetch;
pub mod partition;
pub mod report;
pub mod sink;
pub mod summary;
