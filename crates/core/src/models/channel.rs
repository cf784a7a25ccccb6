use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 上游渠道类型，决定测试请求的协议格式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    OpenAi,
    Gemini,
    GitHub,
    Custom,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::OpenAi => "open_ai",
            ChannelType::Gemini => "gemini",
            ChannelType::GitHub => "git_hub",
            ChannelType::Custom => "custom",
        }
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open_ai" => Ok(ChannelType::OpenAi),
            "gemini" => Ok(ChannelType::Gemini),
            "git_hub" => Ok(ChannelType::GitHub),
            "custom" => Ok(ChannelType::Custom),
            _ => Err(format!("Invalid channel type: {s}")),
        }
    }
}

/// 渠道健康状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Enabled,
    /// 运维手动禁用
    Disabled,
    /// 健康巡检自动禁用
    AutoDisabled,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Enabled => "enabled",
            ChannelStatus::Disabled => "disabled",
            ChannelStatus::AutoDisabled => "auto_disabled",
        }
    }
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(ChannelStatus::Enabled),
            "disabled" => Ok(ChannelStatus::Disabled),
            "auto_disabled" => Ok(ChannelStatus::AutoDisabled),
            _ => Err(format!("Invalid channel status: {s}")),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for ChannelStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ChannelStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(s.parse::<ChannelStatus>()?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ChannelStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

impl sqlx::Type<sqlx::Sqlite> for ChannelType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ChannelType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(s.parse::<ChannelType>()?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ChannelType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 上游渠道（由渠道目录持有，测试引擎只读取快照）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub channel_type: ChannelType,
    pub base_url: String,
    /// 凭证，仅在 `with_secret` 读取时填充
    #[serde(skip_serializing)]
    pub key: Option<String>,
    /// 声明的模型目录，保持配置顺序
    pub models: Vec<String>,
    /// 渠道默认测试模型
    pub test_model: Option<String>,
    pub status: ChannelStatus,
    pub auto_ban: bool,
    pub response_time_ms: i64,
    pub test_time: Option<DateTime<Utc>>,
    pub status_reason: Option<String>,
    pub status_time: Option<DateTime<Utc>>,
    pub retested_at: Option<DateTime<Utc>>,
}

impl Channel {
    /// 渠道默认测试模型：显式配置优先，否则取目录中的第一个模型
    pub fn default_test_model(&self) -> Option<&str> {
        self.test_model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| self.models.first().map(String::as_str))
    }

    pub fn is_enabled(&self) -> bool {
        self.status == ChannelStatus::Enabled
    }

    /// 将逗号分隔的模型字符串解析为模型列表
    pub fn parse_models(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn join_models(models: &[String]) -> String {
        models.join(",")
    }
}

/// 健康巡检写回的测速信息
#[derive(Debug, Clone)]
pub struct ChannelHealthUpdate {
    pub response_time_ms: i64,
    pub test_time: DateTime<Utc>,
}

/// 渠道变更事件，用于通知路由缓存失效
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    ModelsUpdated { channel_id: i64 },
    StatusChanged { channel_id: i64, status: ChannelStatus },
    HealthUpdated { channel_id: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(models: &[&str], test_model: Option<&str>) -> Channel {
        Channel {
            id: 1,
            name: "primary".to_string(),
            channel_type: ChannelType::OpenAi,
            base_url: "https://api.example.com".to_string(),
            key: None,
            models: models.iter().map(|m| m.to_string()).collect(),
            test_model: test_model.map(str::to_string),
            status: ChannelStatus::Enabled,
            auto_ban: true,
            response_time_ms: 0,
            test_time: None,
            status_reason: None,
            status_time: None,
            retested_at: None,
        }
    }

    #[test]
    fn test_default_test_model_prefers_configured() {
        let c = channel(&["gpt-4o", "gpt-4o-mini"], Some("gpt-4o-mini"));
        assert_eq!(c.default_test_model(), Some("gpt-4o-mini"));
    }

    #[test]
    fn test_default_test_model_falls_back_to_first_model() {
        let c = channel(&["gpt-4o", "gpt-4o-mini"], Some("  "));
        assert_eq!(c.default_test_model(), Some("gpt-4o"));

        let empty = channel(&[], None);
        assert_eq!(empty.default_test_model(), None);
    }

    #[test]
    fn test_parse_models_trims_and_skips_empty() {
        let models = Channel::parse_models(" gpt-4o, ,claude-3,");
        assert_eq!(models, vec!["gpt-4o".to_string(), "claude-3".to_string()]);
        assert_eq!(Channel::join_models(&models), "gpt-4o,claude-3");
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            ChannelStatus::Enabled,
            ChannelStatus::Disabled,
            ChannelStatus::AutoDisabled,
        ] {
            assert_eq!(status.as_str().parse::<ChannelStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ChannelStatus>().is_err());
    }
}
