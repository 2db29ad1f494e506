// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 远程接口错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// 网络层错误 (连接失败、超时等)
    #[error("transport error: {0}")]
    Transport(String),

    /// 服务端返回非2xx状态
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// 响应无法解析
    #[error("malformed response: {0}")]
    Malformed(String),

    /// 上报被服务端拒绝 (success=false)
    #[error("ingestion rejected by server")]
    Rejected,

    #[error("no active session")]
    NoSession,

    #[error("session {0} is already active")]
    AlreadyActive(String),
}

impl ApiError {
    /// 是否为可重试的临时错误
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::Rejected | ApiError::Malformed(_) => true,
            ApiError::Status { code, .. } => *code >= 500 || *code == 429,
            ApiError::NoSession | ApiError::AlreadyActive(_) => false,
        }
    }
}

impl From<ureq::Error> for ApiError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(code, response) => ApiError::Status {
                code,
                body: response.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(t) => ApiError::Transport(t.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ApiError::Transport("refused".into()).is_transient());
        assert!(ApiError::Status {
            code: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!ApiError::Status {
            code: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!ApiError::NoSession.is_transient());
    }
}
