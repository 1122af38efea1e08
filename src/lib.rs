pub mod device;
pub mod device_manager;
pub mod error;
pub mod logging;
pub mod mapped;
pub mod protocol;
pub mod setup;
pub mod socket_server;
pub mod special;
pub mod switcher;
