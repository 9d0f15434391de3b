//! WebSocket 入站信号
//!
//! 客户端发来的文本帧与出站事件共用 `{"event", "data"}` 信封。

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ConversationId, MessageId, UserId};

pub mod signal_names {
    pub const MESSAGE_READ: &str = "message_read";
    pub const PING: &str = "ping";
}

#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    event: String,
    #[serde(default)]
    data: JsonValue,
}

/// 客户端信号
#[derive(Debug, Clone, PartialEq)]
pub enum InboundSignal {
    /// 消息已读
    MessageRead(MessageReadSignal),
    /// 心跳
    Ping,
}

impl InboundSignal {
    /// 解析一个文本帧
    pub fn parse(text: &str) -> DomainResult<Self> {
        let envelope: InboundEnvelope =
            serde_json::from_str(text).map_err(|err| DomainError::malformed(err.to_string()))?;

        match envelope.event.as_str() {
            signal_names::MESSAGE_READ => {
                let signal = serde_json::from_value(envelope.data)
                    .map_err(|err| DomainError::malformed(err.to_string()))?;
                Ok(Self::MessageRead(signal))
            }
            signal_names::PING => Ok(Self::Ping),
            other => Err(DomainError::UnknownSignal(other.to_string())),
        }
    }
}

/// `message_read` 载荷，字段都可能缺失，由 [`MessageReadSignal::validate`] 把关
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct MessageReadSignal {
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub reader_id: Option<UserId>,
    #[serde(default)]
    pub message_ids: Option<Vec<MessageId>>,
}

/// 校验通过的已读信号
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRead {
    pub conversation_id: ConversationId,
    pub reader_id: UserId,
    pub message_ids: Option<Vec<MessageId>>,
}

impl MessageReadSignal {
    pub fn validate(self) -> DomainResult<MessageRead> {
        let conversation_id = self
            .conversation_id
            .filter(|id| id.is_valid())
            .ok_or_else(|| DomainError::validation_error("conversation_id", "required"))?;
        let reader_id = self
            .reader_id
            .ok_or_else(|| DomainError::validation_error("reader_id", "required"))?;

        Ok(MessageRead {
            conversation_id,
            reader_id,
            message_ids: self.message_ids,
        })
    }
}
