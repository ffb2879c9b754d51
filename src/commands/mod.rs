pub mod check;
pub mod install;
pub mod status;
pub mod uninstall;
pub mod watch;
