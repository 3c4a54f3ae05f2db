//! Print requests and the idempotency key that deduplicates them.

use chrono::{DateTime, Utc};
use common::{InvoiceId, PrintRequestId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::invoice::InvoiceError;

/// Client-supplied token identifying one logical print request.
///
/// Retried requests carrying the same key resolve to the same print request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Maximum key length in characters.
    pub const MAX_LENGTH: usize = 128;

    /// Validates and wraps a key.
    ///
    /// Surrounding whitespace is ignored. The key must be non-empty, at most
    /// [`Self::MAX_LENGTH`] characters, and contain only ASCII letters,
    /// digits, `-` and `_`.
    pub fn parse(raw: &str) -> Result<Self, InvoiceError> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(InvoiceError::InvalidIdempotencyKey {
                reason: "must not be empty",
            });
        }
        if key.len() > Self::MAX_LENGTH {
            return Err(InvoiceError::InvalidIdempotencyKey {
                reason: "must be at most 128 characters",
            });
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(InvoiceError::InvalidIdempotencyKey {
                reason: "only letters, digits, '-' and '_' are allowed",
            });
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = InvoiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

/// Lifecycle of a print request.
///
/// ```text
/// Pending ──┬──► Done
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrintRequestStatus {
    /// Waiting for the inventory reservation or the rendered artifact.
    #[default]
    Pending,

    /// Invoice closed or artifact produced (terminal state).
    Done,

    /// Reservation rejected, invoice without items, or rendering failed (terminal state).
    Failed,
}

impl PrintRequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PrintRequestStatus::Pending)
    }

    /// Returns the persisted name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrintRequestStatus::Pending => "PENDING",
            PrintRequestStatus::Done => "DONE",
            PrintRequestStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PrintRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown print request status: {0}")]
pub struct UnknownPrintRequestStatus(pub String);

impl std::str::FromStr for PrintRequestStatus {
    type Err = UnknownPrintRequestStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PrintRequestStatus::Pending),
            "DONE" => Ok(PrintRequestStatus::Done),
            "FAILED" => Ok(PrintRequestStatus::Failed),
            other => Err(UnknownPrintRequestStatus(other.to_string())),
        }
    }
}

/// Errors raised by illegal print request transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrintRequestError {
    #[error("Print request is already {status}")]
    AlreadySettled { status: PrintRequestStatus },

    #[error("Print request already has an artifact")]
    ArtifactAlreadyAttached,
}

impl PrintRequestError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidState
    }
}

/// A request to print an invoice, created at most once per idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintRequest {
    id: PrintRequestId,
    invoice_id: InvoiceId,
    status: PrintRequestStatus,
    idempotency_key: IdempotencyKey,
    requested_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    artifact_url: Option<String>,
}

impl PrintRequest {
    /// Creates a new pending request.
    pub fn pending(invoice_id: InvoiceId, idempotency_key: IdempotencyKey) -> Self {
        Self {
            id: PrintRequestId::new(),
            invoice_id,
            status: PrintRequestStatus::Pending,
            idempotency_key,
            requested_at: Utc::now(),
            completed_at: None,
            error_message: None,
            artifact_url: None,
        }
    }

    /// Rebuilds a request from persisted state.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: PrintRequestId,
        invoice_id: InvoiceId,
        status: PrintRequestStatus,
        idempotency_key: IdempotencyKey,
        requested_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        error_message: Option<String>,
        artifact_url: Option<String>,
    ) -> Self {
        Self {
            id,
            invoice_id,
            status,
            idempotency_key,
            requested_at,
            completed_at,
            error_message,
            artifact_url,
        }
    }

    /// Marks the request done.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), PrintRequestError> {
        self.ensure_pending()?;
        self.status = PrintRequestStatus::Done;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Marks the request failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), PrintRequestError> {
        self.ensure_pending()?;
        self.status = PrintRequestStatus::Failed;
        self.error_message = Some(reason.into());
        Ok(())
    }

    /// Records the rendered artifact.
    ///
    /// Accepted while pending or done, once.
    pub fn attach_artifact(
        &mut self,
        url: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), PrintRequestError> {
        if self.status == PrintRequestStatus::Failed {
            return Err(PrintRequestError::AlreadySettled {
                status: self.status,
            });
        }
        if self.artifact_url.is_some() {
            return Err(PrintRequestError::ArtifactAlreadyAttached);
        }
        self.status = PrintRequestStatus::Done;
        self.artifact_url = Some(url.into());
        self.completed_at.get_or_insert(at);
        Ok(())
    }

    /// Returns true if [`Self::attach_artifact`] would succeed.
    pub fn accepts_artifact(&self) -> bool {
        self.status != PrintRequestStatus::Failed && self.artifact_url.is_none()
    }

    fn ensure_pending(&self) -> Result<(), PrintRequestError> {
        if self.status.is_terminal() {
            return Err(PrintRequestError::AlreadySettled {
                status: self.status,
            });
        }
        Ok(())
    }

    // Query methods

    pub fn id(&self) -> PrintRequestId {
        self.id
    }

    pub fn invoice_id(&self) -> InvoiceId {
        self.invoice_id
    }

    pub fn status(&self) -> PrintRequestStatus {
        self.status
    }

    pub fn is_pending(&self) -> bool {
        self.status == PrintRequestStatus::Pending
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn artifact_url(&self) -> Option<&str> {
        self.artifact_url.as_deref()
    }
}
