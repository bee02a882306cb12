pub mod db;
pub mod domain;
pub mod store;

pub use domain::{HourlySnapshot, Reading};
pub use store::{KeyRange, MemoryStore, ReadingStore, SortOrder, StoreError};
