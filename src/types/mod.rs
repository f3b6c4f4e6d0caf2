mod config_record;
mod sync_state;

pub use config_record::{ConfigField, ConfigRecord, MAX_STRING_LEN};
pub use sync_state::{SaveOutcome, SyncEvent, SyncSnapshot, SyncState};
