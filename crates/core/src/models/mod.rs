//! # 数据模型
//!
//! 渠道测试引擎的核心数据结构。
//!
//! - [`Channel`] - 上游渠道快照，由渠道目录持有
//! - [`TestJob`] - 批量测试任务，创建后只由自己的 Worker Pool 修改，且只会进入一次终态
//! - [`TestResult`] - 单元测试结果，运行期间只追加，之后只能被单条重试原地更新
//! - [`TestOutcome`] - 测试执行器的一次调用结果
//!
//! ## 任务状态流转
//! ```text
//! Pending → Running → Succeeded
//!    ↓         ↓
//!  Failed   Cancelled
//! ```
//!
//! 单元级失败不会让任务失败，`Failed` 只用于分发错误。

pub mod channel;
pub mod job;
pub mod result;

pub use channel::*;
pub use job::*;
pub use result::*;
