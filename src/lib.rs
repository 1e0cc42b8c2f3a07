pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod refresh;
pub mod wal;
