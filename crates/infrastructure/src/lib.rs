//! # Gateway Infrastructure
//!
//! 存储与可观测性实现：SQLite 版本的任务/结果/渠道仓储、建表迁移，
//! 以及 Prometheus 指标收集。

pub mod database;
pub mod observability;

pub use database::*;
pub use observability::*;
