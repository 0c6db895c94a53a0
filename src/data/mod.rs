//! Input data: loading, field resolution, cleaning and sessionization.

pub mod event;
pub mod fields;
pub mod ingest;
pub mod preprocess;
pub mod session;

pub use event::{
    DeviceClass, DeviceInfo, EventType, InteractionEvent, LocationInfo, TrafficChannel,
    TrafficInfo, VisitInfo,
};
pub use fields::{RawRecord, project};
pub use ingest::{InputFormat, load_file, parse_str};
pub use preprocess::{Dataset, PreprocessStats, Preprocessor};
pub use session::{AnalysisWindow, ConversionRules, Session, collapse_repeats, sessionize};
