//! Error types for the service layer and the SEFAZ protocol stack.
//!
//! `ServiceError` is the crate-wide error currency: every database operation
//! and service function returns it, optionally enriched with an
//! [`ErrorContext`] carrying tags, details and metadata for diagnostics.
//! `SefazError` is the protocol-level taxonomy of the certificate/SOAP/XML
//! pipeline; it converts into `ServiceError` at the orchestrator boundary.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

/// Structured diagnostic context attached to a [`ServiceError`].
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ErrorContext {
    pub tags: Vec<String>,
    pub detail: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl ErrorContext {
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Service-layer error with HTTP-ish severity classes.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("{message}")]
    BadRequest { message: String, context: ErrorContext },
    #[error("{message}")]
    NotFound { message: String, context: ErrorContext },
    #[error("{message}")]
    Conflict { message: String, context: ErrorContext },
    #[error("{message}")]
    InternalServerError { message: String, context: ErrorContext },
}

impl ServiceError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::InternalServerError {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::InternalServerError { message, .. } => message,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::BadRequest { context, .. }
            | Self::NotFound { context, .. }
            | Self::Conflict { context, .. }
            | Self::InternalServerError { context, .. } => context,
        }
    }

    /// Rebuild the attached context through a closure.
    pub fn with_context<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ErrorContext) -> ErrorContext,
    {
        let ctx = match &mut self {
            Self::BadRequest { context, .. }
            | Self::NotFound { context, .. }
            | Self::Conflict { context, .. }
            | Self::InternalServerError { context, .. } => context,
        };
        *ctx = f(std::mem::take(ctx));
        self
    }

    pub fn with_tag(self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        self.with_context(|ctx| ctx.with_tag(tag))
    }

    pub fn with_detail(self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        self.with_context(|ctx| ctx.with_detail(detail))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failure taxonomy of the SEFAZ discovery pipeline.
///
/// Per-document problems are not represented here: they are absorbed and
/// counted by the parser/orchestrator. Everything below is fatal to the
/// call (and, unhandled, to the query run).
#[derive(Debug, Error)]
pub enum SefazError {
    /// Wrong password, malformed PKCS#12 container, undecodable PEM or a
    /// container without a private key/certificate pair.
    #[error("invalid digital certificate: {0}")]
    InvalidCertificate(String),

    /// The current date is outside the certificate validity window.
    #[error("digital certificate expired or not yet valid ({inicio} to {fim})")]
    CertificateExpired {
        inicio: chrono::NaiveDate,
        fim: chrono::NaiveDate,
    },

    /// No endpoint or region code is configured for the state/service pair.
    #[error("no SEFAZ endpoint configured for UF {uf} and service {servico}")]
    UnsupportedRegion { uf: String, servico: String },

    /// Connect failure or request timeout.
    #[error("network failure talking to SEFAZ: {0}")]
    NetworkError(String),

    /// Non-2xx HTTP status from the government endpoint.
    #[error("SEFAZ endpoint answered HTTP status {status}")]
    UpstreamError { status: u16 },

    /// Envelope-level decode failure; aborts the whole call.
    #[error("unparseable SEFAZ response: {0}")]
    ParseError(String),
}

impl From<SefazError> for ServiceError {
    fn from(err: SefazError) -> Self {
        let message = err.to_string();
        let error = match &err {
            SefazError::InvalidCertificate(_)
            | SefazError::CertificateExpired { .. }
            | SefazError::UnsupportedRegion { .. } => ServiceError::bad_request(message),
            SefazError::NetworkError(_)
            | SefazError::UpstreamError { .. }
            | SefazError::ParseError(_) => ServiceError::internal_server_error(message),
        };
        error.with_context(|ctx| ctx.with_tag("sefaz"))
    }
}
