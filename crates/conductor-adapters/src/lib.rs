pub mod command;
pub mod fs_context;

pub use command::CommandInvoker;
pub use fs_context::FsContextService;
