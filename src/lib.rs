pub mod api;
pub mod availability;
pub mod clock;
pub mod config;
pub mod error;
pub mod intervals;
pub mod limits;
pub mod model;
pub mod observability;
pub mod platform;
pub mod recalc;
pub mod reconcile;
pub mod reservation;
pub mod schedule;
pub mod slots;
pub mod store;
pub mod sweeper;
pub mod tenant;
pub mod wal;
