pub mod clock;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod protocol;
pub mod validate;
pub mod wal;
pub mod wire;
