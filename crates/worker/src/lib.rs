//! # Gateway Worker
//!
//! 测试任务的执行侧：取消标志、重试协调器、测试范围展开、
//! 按任务划分的 Worker Pool，以及基于 HTTP 的测试执行器。

pub mod cancellation;
pub mod executors;
pub mod pool;
pub mod retry;
pub mod scope;

pub use cancellation::{CancellationFlag, CancellationRegistry};
pub use executors::{GeminiAdapter, HttpChannelTester, OpenAiCompatibleAdapter, ProviderAdapter};
pub use pool::WorkerPool;
pub use retry::{RetryCoordinator, UnitReport};
pub use scope::UnitResolver;
