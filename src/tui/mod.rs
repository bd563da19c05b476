//! TUI module for terminal user interfaces

mod validator;

pub use validator::ValidatorApp;
