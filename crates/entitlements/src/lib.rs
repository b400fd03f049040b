//! Entitlements domain module (event-sourced).
//!
//! One entitlement stream exists per (user, product) pair. It records how the
//! user got access, which content units they consumed, whether they completed
//! the product and the certificate issued for it.

pub mod entitlement;
pub mod progress;

pub use entitlement::{
    AGGREGATE_TYPE as ENTITLEMENT_AGGREGATE_TYPE,
    CertificateIssued, CertificateStatus, CompletionBackfilled, CompletionReverted,
    DownloadRecorded, Entitlement, EntitlementCommand, EntitlementCompleted, EntitlementEvent,
    EntitlementGranted, EntitlementId, EntitlementRevoked, GrantEntitlement, ImportLegacy,
    IssueCertificate, LegacyCertificate, LegacyImported, MarkUnitSeen, RecordDownload,
    RevokeEntitlement, UnitMarkedSeen, UnitUnmarked, UnmarkUnitSeen,
};
pub use progress::Progress;
