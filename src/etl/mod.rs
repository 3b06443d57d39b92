/// ETL Module
///
/// The transform and load halves of the export pipeline:
/// - Extract/transform: decode raw block payloads into normalized records
/// - Load: write records to the configured item exporter sinks
pub mod extract;
pub mod load;
