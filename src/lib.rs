pub mod auth;
pub mod backend;
pub mod booking;
pub mod compactor;
pub mod config;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod ports;
pub mod time;
pub mod wal;
