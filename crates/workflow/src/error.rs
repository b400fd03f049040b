use thiserror::Error;

use coursemart_catalog::{ContentUnitId, ProductId};
use coursemart_core::DomainError;
use coursemart_infra::command_dispatcher::DispatchError;
use coursemart_infra::event_store::EventStoreError;
use coursemart_infra::projections::ProjectionError;
use coursemart_pricing::PricingError;
use coursemart_purchasing::Purchase;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Coarse error taxonomy exposed to callers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    StateConflict,
    UnavailableDependency,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid country: {0}")]
    InvalidCountry(String),

    #[error("cart mixes currencies: {0}")]
    MixedCurrency(String),

    #[error("unit {unit} does not belong to product {product}")]
    UnknownUnit {
        product: ProductId,
        unit: ContentUnitId,
    },

    #[error("product {0} is not available")]
    ProductUnavailable(ProductId),

    #[error("product {0} has no price")]
    MissingPrice(ProductId),

    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("purchase not found: {0}")]
    PurchaseNotFound(String),

    #[error("no active entitlement for product {0}")]
    NotEntitled(ProductId),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("product not completed ({consumed}/{total} units consumed)")]
    NotCompleted { consumed: u32, total: u32 },

    /// The purchase had already granted access; carries it as it stands.
    #[error("purchase {} is already approved", .0.id_typed())]
    AlreadyApproved(Box<Purchase>),

    #[error("payment not completed (gateway status: {0})")]
    PaymentIncomplete(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("{dependency} unavailable: {message}")]
    Unavailable {
        dependency: &'static str,
        message: String,
    },
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation(_)
            | WorkflowError::InvalidCountry(_)
            | WorkflowError::MixedCurrency(_)
            | WorkflowError::UnknownUnit { .. }
            | WorkflowError::ProductUnavailable(_)
            | WorkflowError::MissingPrice(_) => ErrorKind::Validation,

            WorkflowError::ProductNotFound(_)
            | WorkflowError::PurchaseNotFound(_)
            | WorkflowError::NotEntitled(_)
            | WorkflowError::NotFound(_) => ErrorKind::NotFound,

            WorkflowError::NotCompleted { .. }
            | WorkflowError::AlreadyApproved(_)
            | WorkflowError::PaymentIncomplete(_)
            | WorkflowError::InvalidState(_)
            | WorkflowError::Conflict(_) => ErrorKind::StateConflict,

            WorkflowError::Unavailable { .. } => ErrorKind::UnavailableDependency,
        }
    }

    pub(crate) fn unavailable(dependency: &'static str, message: impl ToString) -> Self {
        Self::Unavailable {
            dependency,
            message: message.to_string(),
        }
    }
}

impl From<DomainError> for WorkflowError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                WorkflowError::Validation(msg)
            }
            DomainError::NotFound(msg) => WorkflowError::NotFound(msg),
            DomainError::InvalidState(msg) => WorkflowError::InvalidState(msg),
            DomainError::AlreadyGranted(msg) => WorkflowError::InvalidState(msg),
            DomainError::Conflict(msg) => WorkflowError::Conflict(msg),
        }
    }
}

impl From<PricingError> for WorkflowError {
    fn from(value: PricingError) -> Self {
        match value {
            PricingError::InvalidCountry(c) => WorkflowError::InvalidCountry(c),
            other => WorkflowError::Validation(other.to_string()),
        }
    }
}

impl From<DispatchError> for WorkflowError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Domain(e) => e.into(),
            DispatchError::Concurrency(msg) => WorkflowError::Conflict(msg),
            DispatchError::Store(e) => WorkflowError::unavailable("event store", store_message(e)),
            other => WorkflowError::unavailable("event store", other),
        }
    }
}

impl From<ProjectionError> for WorkflowError {
    fn from(value: ProjectionError) -> Self {
        match value {
            ProjectionError::Store(e) => WorkflowError::unavailable("read model", store_message(e)),
            other => WorkflowError::unavailable("read model", other),
        }
    }
}

/// The store's own message, without its "unavailable" prefix.
fn store_message(err: EventStoreError) -> String {
    match err {
        EventStoreError::Unavailable(message) => message,
        other => other.to_string(),
    }
}
