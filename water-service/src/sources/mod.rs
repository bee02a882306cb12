pub mod http_readings;
pub mod reading_backfill_file;
pub mod reading_csv_file;

pub use http_readings::{HttpReadingSource, ReadingIngress, ReadingSubmission};
pub use reading_backfill_file::ReadingBackfillFileSource;
pub use reading_csv_file::ReadingCsvFileSource;
