//! Logging facade for the asset vault services. Components log through the
//! re-exported macros so the subscriber wiring stays in one place.

pub use tracing::{debug, error, info, instrument, span, trace, warn, Level};

mod telemetry;

pub use telemetry::{get_subscriber, init_subscriber, set_panic_hook, LogSink};
