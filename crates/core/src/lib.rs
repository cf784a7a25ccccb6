//! # Gateway Core
//!
//! 渠道测试与自动修复引擎的核心库：数据模型、错误类型、配置，
//! 以及引擎与外部协作者（存储、渠道目录、测试执行器、策略）之间的接口。

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use errors::*;
pub use models::{
    Channel, ChannelStatus, ChannelType, JobStatus, TestJob, TestOutcome, TestResult, TestUnit,
};
pub use traits::{
    BanPolicy, ChannelDirectory, ChannelTester, Notifier, ReenablePolicy, TestJobRepository,
    TestResultRepository,
};
