//! Data layer: typed frames, dataset loaders and load-time transforms.

pub mod frame;
pub mod schema;
pub mod source;
pub mod transform;

pub use frame::{Column, ColumnData, Frame, MissingValues};
pub use schema::{ColumnKinds, ColumnType};
pub use source::{
    CsvSource, DataBatch, DataSource, DataSourceType, JsonSource, JsonlSource,
    ParquetSource, SqliteSource,
};
pub use transform::{TransformPipeline, TransformStep};
