pub mod host;
pub mod runtime_error;
pub mod sandbox;
pub mod support;
pub mod vm;
