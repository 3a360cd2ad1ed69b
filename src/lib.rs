pub mod auth;
pub mod compactor;
pub mod limits;
pub mod model;
pub mod observability;
pub mod placement;
pub mod property;
pub mod rack;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
