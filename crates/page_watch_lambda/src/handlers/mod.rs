pub mod dispatcher;
pub mod monitor;
pub mod orchestrator;

pub use dispatcher::handle_dispatch_request;
pub use monitor::handle_monitor_request;
pub use orchestrator::{handle_tick, tick_from_event};
