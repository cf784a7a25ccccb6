//! 网关配置
//!
//! 加载顺序：内置默认值 → TOML 配置文件 → `GATEWAY_` 前缀的环境变量，
//! 加载后逐段校验。

pub mod models;

#[cfg(test)]
mod tests;

pub use models::*;
