pub mod hourly_snapshot;
pub mod reading;

pub use hourly_snapshot::HourlySnapshot;
pub use reading::Reading;
