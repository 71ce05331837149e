pub mod codec;
pub mod error;
pub mod interpolate;
pub mod join;
pub mod model;
pub mod normalize;
pub mod null_runs;
pub mod object_store;
pub mod pipelines;
pub mod publish;
pub mod resample;
pub mod retry;
pub mod schema;
pub mod table;
pub mod window;

pub use error::PipelineError;
pub use table::{Frequency, Segment, TableColumn, TableError, TimeSeriesTable};
