pub mod add;
pub mod cleanup;
pub mod common;
pub mod delete;
pub mod device;
pub mod list;
pub mod status;
pub mod sync;
pub mod update;
pub mod watch;
