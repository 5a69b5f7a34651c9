pub mod book;
pub mod progress;
pub mod unit;

pub use book::BookMetadata;
pub use progress::{AcquisitionProgress, ProgressRecord};
pub use unit::{order_units, ChapterEntry, ChapterKey, UnitContent, UnitRef};
