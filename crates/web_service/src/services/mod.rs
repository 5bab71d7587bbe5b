pub mod active_streams;
pub mod push_fanout;
pub mod session_sync;
pub mod stop_service;
pub mod streaming_coordinator;
pub mod thinking_parser;

pub use active_streams::ActiveStreamTable;
pub use push_fanout::PushFanout;
