//! 领域模型错误定义
//!
//! 定义了输入校验、信号解析和存储协作方可能返回的错误类型。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 验证错误
    #[error("验证失败: {field}: {message}")]
    ValidationError { field: String, message: String },

    /// 无法识别的入站信号
    #[error("未知信号: {0}")]
    UnknownSignal(String),

    /// 信号载荷格式错误
    #[error("载荷格式错误: {0}")]
    MalformedPayload(String),
}

impl DomainError {
    /// 创建验证错误
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建载荷格式错误
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload(message.into())
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 存储协作方错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    /// 存储暂不可用（连接断开等）
    #[error("storage unavailable")]
    Unavailable,

    /// 查询执行失败
    #[error("storage error: {message}")]
    Storage { message: String },

    /// 存储返回了无法映射的数据
    #[error("invalid stored data: {message}")]
    InvalidData { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
