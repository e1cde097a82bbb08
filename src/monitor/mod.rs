//! Device monitoring: parsing `udisksctl monitor` output into events

pub mod parser;
pub mod sink;
pub mod udisks;

pub use parser::DeviceEventParser;
pub use sink::{ChannelSink, EventSink, QueuedSink};
pub use udisks::{MonitorSettings, UdisksMonitor};
