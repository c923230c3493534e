pub mod shutdown;

pub use shutdown::GracefulShutdown;
