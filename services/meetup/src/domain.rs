// Domain layer modules
pub mod clock;
pub mod event;
pub mod reconciliation;

// Re-exports
pub use clock::{Clock, FixedClock, SystemClock};
pub use event::{Event, Host, Image, Venue, format_store_datetime, parse_store_datetime};
pub use reconciliation::ImportDiff;
