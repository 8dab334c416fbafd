pub mod people;
pub mod sessions_aggregated;
pub mod source_tables;
