pub mod bulk_load;
pub mod ingest_step;

pub use bulk_load::{BulkLoadFlight, BULK_LOAD_CLASS};
pub use ingest_step::IngestFilesStep;
