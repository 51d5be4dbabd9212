//! Platform-agnostic types for the smart water dispenser.
//!
//! This crate holds everything that does not touch Bluetooth directly and is
//! shared by `dispenser-core` and the command-line front end.
//!
//! # Features
//!
//! - Attribute addresses of the dispenser's GATT characteristics
//! - The plain-text command grammar
//! - History granularity, bucket series and summary statistics
//! - The text payload codec
//!
//! # Example
//!
//! ```
//! use dispenser_types::{Command, codec};
//!
//! let payload = codec::encode_command(&Command::PumpOn.to_string());
//! assert_eq!(codec::decode_payload(&payload).unwrap(), "PUMP_ON");
//! assert_eq!(codec::parse_sample_list("1,2,x"), vec![1.0, 2.0, 0.0]);
//! ```

pub mod codec;
pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    Bucket, BucketSeries, Command, ConnectionState, DeviceMode, Granularity, LinkStatus,
    NOT_CONNECTED_LABEL, SummaryStats, TelemetrySnapshot,
};
pub use uuid::CharacteristicAddress;
pub use uuid as uuids;
