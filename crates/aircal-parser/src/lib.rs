pub mod errors;
pub mod formats;
pub mod model;

pub use errors::ParserError;
pub use formats::{parse_device_payload, parse_feature_rows, parse_reference_export};
pub use model::{records_to_frame, DeviceRecords, FeatureRow, RawRecord};
