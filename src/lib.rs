pub mod adb;
pub mod args;
pub mod config;

pub use adb::{AdbError, AdbResult, Session};
pub use config::Settings;
