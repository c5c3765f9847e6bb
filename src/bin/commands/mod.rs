pub mod build_cmd;
pub mod export_cmd;
pub mod health_cmd;
pub mod inspect_cmd;
pub mod lookup_cmd;
pub mod network_cmd;
pub mod watch_cmd;

pub use build_cmd::cmd_build;
pub use export_cmd::cmd_export;
pub use health_cmd::cmd_health;
pub use inspect_cmd::cmd_inspect;
pub use lookup_cmd::cmd_lookup;
pub use network_cmd::cmd_network;
pub use watch_cmd::cmd_watch;
