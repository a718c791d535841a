#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Store, table or sink temporarily unavailable; redelivery or retry recovers.
    Transient,
    /// Payload could not be decoded; retrying cannot help.
    Malformed,
    /// The invocation ran out of its execution budget.
    BudgetExceeded,
    /// Required configuration is missing or invalid.
    Misconfiguration,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Malformed => "malformed",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Misconfiguration => "misconfiguration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, message)
    }

    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BudgetExceeded, message)
    }

    pub fn misconfiguration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Misconfiguration, message)
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for HandlerError {}
