mod error;
mod executor;
mod types;
pub mod whitelist;

pub use executor::Executor;
pub use types::ExecResult;
