pub mod store;

pub use store::{FailurePolicy, ReadingStoreSink};
