mod sanitize;
mod severity_level;
mod telemetry_entry;
mod timestamp;
mod wire_entry;

pub(crate) use sanitize::*;
pub use severity_level::*;
pub use telemetry_entry::*;
pub use timestamp::*;
pub use wire_entry::*;

/// Caller supplied key/value metadata.
pub type Properties = std::collections::BTreeMap<String, String>;
