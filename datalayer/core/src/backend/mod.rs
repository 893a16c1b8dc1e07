//! Backend executors
//!
//! Two interchangeable stores sit behind [`QueryExecutor`]:
//!
//! - [`LakebaseExecutor`]: Postgres-compatible row store, pooled connections,
//!   queries rewritten to synced table names
//! - [`WarehouseExecutor`]: SQL warehouse via the statement execution REST API

pub mod lakebase;
pub mod params;
pub mod traits;
pub mod warehouse;

pub use lakebase::{LakebaseExecutor, LakebaseSettings};
pub use traits::QueryExecutor;
pub use warehouse::{WarehouseExecutor, WarehouseSettings};
