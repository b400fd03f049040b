use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coursemart_catalog::{AccessLimits, ContentUnitId, ProductId};
use coursemart_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use coursemart_events::Event;
use coursemart_pricing::{Amount, Currency};
use coursemart_purchasing::PurchaseId;

use crate::progress::Progress;

/// Namespace for (user, product) derived entitlement ids.
const ENTITLEMENT_NAMESPACE: Uuid = Uuid::from_u128(0x6c0a_3f7e_91d2_4b6a_8e15_2f4d_7a90_c3e1);

/// Entitlement identifier, derived from the (user, product) pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitlementId(pub AggregateId);

impl EntitlementId {
    /// The only stream id an entitlement for `(user, product)` can have.
    pub fn for_pair(user: UserId, product: ProductId) -> Self {
        Self(AggregateId::derived(
            &ENTITLEMENT_NAMESPACE,
            &[user.as_uuid(), product.aggregate_id().as_uuid()],
        ))
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.0
    }
}

impl core::fmt::Display for EntitlementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Certificate lifecycle. Once `Issued`, the code never changes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CertificateStatus {
    #[default]
    NotEligible,
    /// Completed, no code generated yet.
    Pending,
    Issued {
        code: String,
        issued_at: DateTime<Utc>,
    },
}

impl CertificateStatus {
    pub fn code(&self) -> Option<&str> {
        match self {
            CertificateStatus::Issued { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Aggregate root: Entitlement.
#[derive(Debug, Clone, PartialEq)]
pub struct Entitlement {
    id: EntitlementId,
    user: Option<UserId>,
    product: Option<ProductId>,
    source_purchase: Option<PurchaseId>,
    acquired_at: Option<DateTime<Utc>>,
    price_paid: Amount,
    currency: Currency,
    consumed: BTreeSet<ContentUnitId>,
    completed: bool,
    completed_at: Option<DateTime<Utc>>,
    certificate: CertificateStatus,
    downloads: u32,
    last_download_at: Option<DateTime<Utc>>,
    active: bool,
    version: u64,
    created: bool,
}

impl Entitlement {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: EntitlementId) -> Self {
        Self {
            id,
            user: None,
            product: None,
            source_purchase: None,
            acquired_at: None,
            price_paid: Amount::ZERO,
            currency: Currency::Usd,
            consumed: BTreeSet::new(),
            completed: false,
            completed_at: None,
            certificate: CertificateStatus::NotEligible,
            downloads: 0,
            last_download_at: None,
            active: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> EntitlementId {
        self.id
    }

    pub fn user(&self) -> Option<UserId> {
        self.user
    }

    pub fn product(&self) -> Option<ProductId> {
        self.product
    }

    pub fn source_purchase(&self) -> Option<PurchaseId> {
        self.source_purchase
    }

    pub fn acquired_at(&self) -> Option<DateTime<Utc>> {
        self.acquired_at
    }

    pub fn price_paid(&self) -> Amount {
        self.price_paid
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn consumed(&self) -> &BTreeSet<ContentUnitId> {
        &self.consumed
    }

    pub fn has_consumed(&self, unit: &ContentUnitId) -> bool {
        self.consumed.contains(unit)
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn certificate(&self) -> &CertificateStatus {
        &self.certificate
    }

    pub fn downloads(&self) -> u32 {
        self.downloads
    }

    pub fn last_download_at(&self) -> Option<DateTime<Utc>> {
        self.last_download_at
    }

    /// The user currently has access.
    pub fn is_active(&self) -> bool {
        self.created && self.active
    }

    /// The stream exists, even if access was revoked.
    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn progress(&self, total_units: u32) -> Progress {
        Progress::new(self.consumed.len() as u32, total_units, self.completed)
    }
}

/// Stream type tag of every entitlement stream.
pub const AGGREGATE_TYPE: &str = "entitlements.entitlement";

impl AggregateRoot for Entitlement {
    type Id = EntitlementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: GrantEntitlement (a granting purchase gives access).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantEntitlement {
    pub entitlement_id: EntitlementId,
    pub user: UserId,
    pub product: ProductId,
    pub purchase: PurchaseId,
    pub price_paid: Amount,
    pub currency: Currency,
    pub occurred_at: DateTime<Utc>,
}

/// Certificate carried over from a legacy record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyCertificate {
    pub code: String,
    pub issued_at: DateTime<Utc>,
}

/// Command: ImportLegacy (migrate a pre-existing access record as-is).
///
/// Legacy records may be completed without a completion timestamp; the
/// certificate issuer backfills it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportLegacy {
    pub entitlement_id: EntitlementId,
    pub user: UserId,
    pub product: ProductId,
    pub purchase: Option<PurchaseId>,
    pub acquired_at: DateTime<Utc>,
    pub price_paid: Amount,
    pub currency: Currency,
    pub consumed: BTreeSet<ContentUnitId>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub certificate: Option<LegacyCertificate>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkUnitSeen. `total_units` is the product's current unit count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkUnitSeen {
    pub entitlement_id: EntitlementId,
    pub unit: ContentUnitId,
    pub total_units: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UnmarkUnitSeen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmarkUnitSeen {
    pub entitlement_id: EntitlementId,
    pub unit: ContentUnitId,
    pub total_units: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IssueCertificate (check-and-set of the certificate code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCertificate {
    pub entitlement_id: EntitlementId,
    pub code: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordDownload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDownload {
    pub entitlement_id: EntitlementId,
    pub file: ContentUnitId,
    pub limits: AccessLimits,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevokeEntitlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeEntitlement {
    pub entitlement_id: EntitlementId,
    pub purchase: Option<PurchaseId>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntitlementCommand {
    GrantEntitlement(GrantEntitlement),
    ImportLegacy(ImportLegacy),
    MarkUnitSeen(MarkUnitSeen),
    UnmarkUnitSeen(UnmarkUnitSeen),
    IssueCertificate(IssueCertificate),
    RecordDownload(RecordDownload),
    RevokeEntitlement(RevokeEntitlement),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementGranted {
    pub entitlement_id: EntitlementId,
    pub user: UserId,
    pub product: ProductId,
    pub purchase: PurchaseId,
    pub price_paid: Amount,
    pub currency: Currency,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyImported {
    pub entitlement_id: EntitlementId,
    pub user: UserId,
    pub product: ProductId,
    pub purchase: Option<PurchaseId>,
    pub acquired_at: DateTime<Utc>,
    pub price_paid: Amount,
    pub currency: Currency,
    pub consumed: BTreeSet<ContentUnitId>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub certificate: Option<LegacyCertificate>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMarkedSeen {
    pub entitlement_id: EntitlementId,
    pub unit: ContentUnitId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitUnmarked {
    pub entitlement_id: EntitlementId,
    pub unit: ContentUnitId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementCompleted {
    pub entitlement_id: EntitlementId,
    pub consumed: u32,
    pub total_units: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReverted {
    pub entitlement_id: EntitlementId,
    pub consumed: u32,
    pub total_units: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CompletionBackfilled (legacy record completed without a timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionBackfilled {
    pub entitlement_id: EntitlementId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateIssued {
    pub entitlement_id: EntitlementId,
    pub code: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecorded {
    pub entitlement_id: EntitlementId,
    pub file: ContentUnitId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRevoked {
    pub entitlement_id: EntitlementId,
    pub purchase: Option<PurchaseId>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntitlementEvent {
    EntitlementGranted(EntitlementGranted),
    LegacyImported(LegacyImported),
    UnitMarkedSeen(UnitMarkedSeen),
    UnitUnmarked(UnitUnmarked),
    EntitlementCompleted(EntitlementCompleted),
    CompletionReverted(CompletionReverted),
    CompletionBackfilled(CompletionBackfilled),
    CertificateIssued(CertificateIssued),
    DownloadRecorded(DownloadRecorded),
    EntitlementRevoked(EntitlementRevoked),
}

impl Event for EntitlementEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EntitlementEvent::EntitlementGranted(_) => "entitlements.entitlement.granted",
            EntitlementEvent::LegacyImported(_) => "entitlements.entitlement.legacy_imported",
            EntitlementEvent::UnitMarkedSeen(_) => "entitlements.entitlement.unit_marked",
            EntitlementEvent::UnitUnmarked(_) => "entitlements.entitlement.unit_unmarked",
            EntitlementEvent::EntitlementCompleted(_) => "entitlements.entitlement.completed",
            EntitlementEvent::CompletionReverted(_) => "entitlements.entitlement.completion_reverted",
            EntitlementEvent::CompletionBackfilled(_) => {
                "entitlements.entitlement.completion_backfilled"
            }
            EntitlementEvent::CertificateIssued(_) => "entitlements.entitlement.certificate_issued",
            EntitlementEvent::DownloadRecorded(_) => "entitlements.entitlement.download_recorded",
            EntitlementEvent::EntitlementRevoked(_) => "entitlements.entitlement.revoked",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            EntitlementEvent::EntitlementGranted(e) => e.occurred_at,
            EntitlementEvent::LegacyImported(e) => e.occurred_at,
            EntitlementEvent::UnitMarkedSeen(e) => e.occurred_at,
            EntitlementEvent::UnitUnmarked(e) => e.occurred_at,
            EntitlementEvent::EntitlementCompleted(e) => e.occurred_at,
            EntitlementEvent::CompletionReverted(e) => e.occurred_at,
            EntitlementEvent::CompletionBackfilled(e) => e.occurred_at,
            EntitlementEvent::CertificateIssued(e) => e.occurred_at,
            EntitlementEvent::DownloadRecorded(e) => e.occurred_at,
            EntitlementEvent::EntitlementRevoked(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Entitlement {
    type Command = EntitlementCommand;
    type Event = EntitlementEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            EntitlementEvent::EntitlementGranted(e) => {
                // A re-grant after revocation keeps the consumption history.
                self.id = e.entitlement_id;
                self.user = Some(e.user);
                self.product = Some(e.product);
                self.source_purchase = Some(e.purchase);
                self.acquired_at = Some(e.occurred_at);
                self.price_paid = e.price_paid;
                self.currency = e.currency;
                self.downloads = 0;
                self.active = true;
                self.created = true;
            }
            EntitlementEvent::LegacyImported(e) => {
                self.id = e.entitlement_id;
                self.user = Some(e.user);
                self.product = Some(e.product);
                self.source_purchase = e.purchase;
                self.acquired_at = Some(e.acquired_at);
                self.price_paid = e.price_paid;
                self.currency = e.currency;
                self.consumed = e.consumed.clone();
                self.completed = e.completed;
                self.completed_at = e.completed_at;
                self.certificate = match (&e.certificate, e.completed) {
                    (Some(c), _) => CertificateStatus::Issued {
                        code: c.code.clone(),
                        issued_at: c.issued_at,
                    },
                    (None, true) => CertificateStatus::Pending,
                    (None, false) => CertificateStatus::NotEligible,
                };
                self.active = true;
                self.created = true;
            }
            EntitlementEvent::UnitMarkedSeen(e) => {
                self.consumed.insert(e.unit.clone());
            }
            EntitlementEvent::UnitUnmarked(e) => {
                self.consumed.remove(&e.unit);
            }
            EntitlementEvent::EntitlementCompleted(e) => {
                self.completed = true;
                self.completed_at = Some(e.occurred_at);
                if self.certificate == CertificateStatus::NotEligible {
                    self.certificate = CertificateStatus::Pending;
                }
            }
            EntitlementEvent::CompletionReverted(_) => {
                self.completed = false;
                self.completed_at = None;
                if self.certificate == CertificateStatus::Pending {
                    self.certificate = CertificateStatus::NotEligible;
                }
            }
            EntitlementEvent::CompletionBackfilled(e) => {
                self.completed_at = Some(e.occurred_at);
            }
            EntitlementEvent::CertificateIssued(e) => {
                self.certificate = CertificateStatus::Issued {
                    code: e.code.clone(),
                    issued_at: e.occurred_at,
                };
            }
            EntitlementEvent::DownloadRecorded(e) => {
                self.downloads += 1;
                self.last_download_at = Some(e.occurred_at);
            }
            EntitlementEvent::EntitlementRevoked(_) => {
                self.active = false;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            EntitlementCommand::GrantEntitlement(cmd) => self.handle_grant(cmd),
            EntitlementCommand::ImportLegacy(cmd) => self.handle_import(cmd),
            EntitlementCommand::MarkUnitSeen(cmd) => self.handle_mark(cmd),
            EntitlementCommand::UnmarkUnitSeen(cmd) => self.handle_unmark(cmd),
            EntitlementCommand::IssueCertificate(cmd) => self.handle_issue(cmd),
            EntitlementCommand::RecordDownload(cmd) => self.handle_download(cmd),
            EntitlementCommand::RevokeEntitlement(cmd) => self.handle_revoke(cmd),
        }
    }
}

impl Entitlement {
    fn ensure_active(&self) -> Result<(), DomainError> {
        if !self.is_active() {
            return Err(DomainError::not_found(format!("entitlement {}", self.id)));
        }
        Ok(())
    }

    fn ensure_entitlement_id(&self, entitlement_id: EntitlementId) -> Result<(), DomainError> {
        if self.id != entitlement_id {
            return Err(DomainError::validation("entitlement_id mismatch"));
        }
        Ok(())
    }

    fn ensure_pair(&self, user: UserId, product: ProductId) -> Result<(), DomainError> {
        if EntitlementId::for_pair(user, product) != self.id {
            return Err(DomainError::validation(
                "entitlement id does not match the (user, product) pair",
            ));
        }
        Ok(())
    }

    fn handle_grant(&self, cmd: &GrantEntitlement) -> Result<Vec<EntitlementEvent>, DomainError> {
        self.ensure_entitlement_id(cmd.entitlement_id)?;
        self.ensure_pair(cmd.user, cmd.product)?;

        if self.is_active() {
            return Err(DomainError::already_granted(format!(
                "user {} already has access to product {}",
                cmd.user, cmd.product
            )));
        }
        if cmd.price_paid.is_negative() {
            return Err(DomainError::validation("price paid must be >= 0"));
        }

        Ok(vec![EntitlementEvent::EntitlementGranted(EntitlementGranted {
            entitlement_id: cmd.entitlement_id,
            user: cmd.user,
            product: cmd.product,
            purchase: cmd.purchase,
            price_paid: cmd.price_paid,
            currency: cmd.currency,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_import(&self, cmd: &ImportLegacy) -> Result<Vec<EntitlementEvent>, DomainError> {
        self.ensure_entitlement_id(cmd.entitlement_id)?;
        self.ensure_pair(cmd.user, cmd.product)?;

        if self.created {
            return Err(DomainError::already_granted(format!(
                "entitlement {} already exists",
                self.id
            )));
        }
        if cmd.completed_at.is_some() && !cmd.completed {
            return Err(DomainError::validation(
                "a completion timestamp requires completed = true",
            ));
        }

        Ok(vec![EntitlementEvent::LegacyImported(LegacyImported {
            entitlement_id: cmd.entitlement_id,
            user: cmd.user,
            product: cmd.product,
            purchase: cmd.purchase,
            acquired_at: cmd.acquired_at,
            price_paid: cmd.price_paid,
            currency: cmd.currency,
            consumed: cmd.consumed.clone(),
            completed: cmd.completed,
            completed_at: cmd.completed_at,
            certificate: cmd.certificate.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark(&self, cmd: &MarkUnitSeen) -> Result<Vec<EntitlementEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_entitlement_id(cmd.entitlement_id)?;

        let mut events = Vec::new();
        let mut consumed = self.consumed.len() as u32;
        if !self.consumed.contains(&cmd.unit) {
            consumed += 1;
            events.push(EntitlementEvent::UnitMarkedSeen(UnitMarkedSeen {
                entitlement_id: cmd.entitlement_id,
                unit: cmd.unit.clone(),
                occurred_at: cmd.occurred_at,
            }));
        }

        // Products without units are never completed by marking.
        if !self.completed && cmd.total_units > 0 && consumed >= cmd.total_units {
            events.push(EntitlementEvent::EntitlementCompleted(EntitlementCompleted {
                entitlement_id: cmd.entitlement_id,
                consumed,
                total_units: cmd.total_units,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_unmark(&self, cmd: &UnmarkUnitSeen) -> Result<Vec<EntitlementEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_entitlement_id(cmd.entitlement_id)?;

        if !self.consumed.contains(&cmd.unit) {
            return Ok(vec![]);
        }

        let consumed = self.consumed.len() as u32 - 1;
        let mut events = vec![EntitlementEvent::UnitUnmarked(UnitUnmarked {
            entitlement_id: cmd.entitlement_id,
            unit: cmd.unit.clone(),
            occurred_at: cmd.occurred_at,
        })];

        if self.completed && consumed < cmd.total_units {
            events.push(EntitlementEvent::CompletionReverted(CompletionReverted {
                entitlement_id: cmd.entitlement_id,
                consumed,
                total_units: cmd.total_units,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_issue(&self, cmd: &IssueCertificate) -> Result<Vec<EntitlementEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_entitlement_id(cmd.entitlement_id)?;

        if let CertificateStatus::Issued { code, .. } = &self.certificate {
            return Err(DomainError::already_granted(format!(
                "certificate {code} already issued"
            )));
        }
        if !self.completed {
            return Err(DomainError::invalid_state("entitlement is not completed"));
        }
        if cmd.code.trim().is_empty() {
            return Err(DomainError::validation("certificate code cannot be empty"));
        }

        let mut events = Vec::with_capacity(2);
        if self.completed_at.is_none() {
            events.push(EntitlementEvent::CompletionBackfilled(CompletionBackfilled {
                entitlement_id: cmd.entitlement_id,
                occurred_at: cmd.occurred_at,
            }));
        }
        events.push(EntitlementEvent::CertificateIssued(CertificateIssued {
            entitlement_id: cmd.entitlement_id,
            code: cmd.code.clone(),
            occurred_at: cmd.occurred_at,
        }));

        Ok(events)
    }

    fn handle_download(&self, cmd: &RecordDownload) -> Result<Vec<EntitlementEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_entitlement_id(cmd.entitlement_id)?;

        if let (Some(days), Some(acquired_at)) = (cmd.limits.access_days, self.acquired_at) {
            // A window ending past the last representable date never closes.
            let closes_at = acquired_at.checked_add_signed(Duration::days(i64::from(days)));
            if closes_at.is_some_and(|end| cmd.occurred_at > end) {
                return Err(DomainError::invalid_state(format!(
                    "access window of {days} days has expired"
                )));
            }
        }
        if let Some(max) = cmd.limits.max_downloads {
            if self.downloads >= max {
                return Err(DomainError::invalid_state(format!(
                    "download limit of {max} reached"
                )));
            }
        }

        Ok(vec![EntitlementEvent::DownloadRecorded(DownloadRecorded {
            entitlement_id: cmd.entitlement_id,
            file: cmd.file.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revoke(&self, cmd: &RevokeEntitlement) -> Result<Vec<EntitlementEvent>, DomainError> {
        self.ensure_entitlement_id(cmd.entitlement_id)?;

        if !self.is_active() {
            return Ok(vec![]);
        }

        Ok(vec![EntitlementEvent::EntitlementRevoked(EntitlementRevoked {
            entitlement_id: cmd.entitlement_id,
            purchase: cmd.purchase,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn unit(i: u32) -> ContentUnitId {
        ContentUnitId::new(format!("u{i}"))
    }

    struct Fixture {
        user: UserId,
        product: ProductId,
        entitlement: Entitlement,
    }

    impl Fixture {
        fn id(&self) -> EntitlementId {
            self.entitlement.id_typed()
        }

        fn exec(&mut self, cmd: EntitlementCommand) -> Vec<EntitlementEvent> {
            let events = self.entitlement.handle(&cmd).unwrap();
            for e in &events {
                self.entitlement.apply(e);
            }
            events
        }

        fn grant_cmd(&self) -> EntitlementCommand {
            EntitlementCommand::GrantEntitlement(GrantEntitlement {
                entitlement_id: self.id(),
                user: self.user,
                product: self.product,
                purchase: PurchaseId::new(AggregateId::new()),
                price_paid: Amount::from_cents(4999),
                currency: Currency::Usd,
                occurred_at: test_time(),
            })
        }

        fn mark(&mut self, i: u32, total: u32) -> Vec<EntitlementEvent> {
            self.exec(EntitlementCommand::MarkUnitSeen(MarkUnitSeen {
                entitlement_id: self.id(),
                unit: unit(i),
                total_units: total,
                occurred_at: test_time(),
            }))
        }

        fn unmark(&mut self, i: u32, total: u32) -> Vec<EntitlementEvent> {
            self.exec(EntitlementCommand::UnmarkUnitSeen(UnmarkUnitSeen {
                entitlement_id: self.id(),
                unit: unit(i),
                total_units: total,
                occurred_at: test_time(),
            }))
        }

        fn issue_cmd(&self, code: &str) -> EntitlementCommand {
            EntitlementCommand::IssueCertificate(IssueCertificate {
                entitlement_id: self.id(),
                code: code.to_string(),
                occurred_at: test_time(),
            })
        }
    }

    fn new_fixture() -> Fixture {
        let user = UserId::new();
        let product = ProductId::new(AggregateId::new());
        Fixture {
            user,
            product,
            entitlement: Entitlement::empty(EntitlementId::for_pair(user, product)),
        }
    }

    fn granted() -> Fixture {
        let mut f = new_fixture();
        let cmd = f.grant_cmd();
        f.exec(cmd);
        f
    }

    #[test]
    fn entitlement_ids_are_per_pair() {
        let user = UserId::new();
        let a = ProductId::new(AggregateId::new());
        let b = ProductId::new(AggregateId::new());

        assert_eq!(EntitlementId::for_pair(user, a), EntitlementId::for_pair(user, a));
        assert_ne!(EntitlementId::for_pair(user, a), EntitlementId::for_pair(user, b));
    }

    #[test]
    fn grant_twice_is_already_granted() {
        let f = granted();
        assert!(f.entitlement.is_active());

        let err = f.entitlement.handle(&f.grant_cmd()).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyGranted(_)));
    }

    #[test]
    fn grant_with_foreign_pair_is_rejected() {
        let f = new_fixture();
        let cmd = EntitlementCommand::GrantEntitlement(GrantEntitlement {
            entitlement_id: f.id(),
            user: UserId::new(),
            product: f.product,
            purchase: PurchaseId::new(AggregateId::new()),
            price_paid: Amount::ZERO,
            currency: Currency::Usd,
            occurred_at: test_time(),
        });
        assert!(matches!(
            f.entitlement.handle(&cmd).unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[test]
    fn four_of_five_is_eighty_percent_and_fifth_completes() {
        let mut f = granted();
        for i in 0..4 {
            f.mark(i, 5);
        }

        let progress = f.entitlement.progress(5);
        assert_eq!(progress.consumed, 4);
        assert!(!progress.completed);
        assert_eq!(progress.percentage, 80);

        let events = f.mark(4, 5);
        assert_eq!(events.len(), 2);
        assert!(f.entitlement.is_completed());
        assert!(f.entitlement.completed_at().is_some());
        assert_eq!(f.entitlement.certificate(), &CertificateStatus::Pending);
    }

    #[test]
    fn marking_twice_is_idempotent() {
        let mut f = granted();
        f.mark(0, 5);
        assert!(f.mark(0, 5).is_empty());
        assert_eq!(f.entitlement.consumed().len(), 1);
    }

    #[test]
    fn unmark_after_completion_reverts_but_keeps_issued_code() {
        let mut f = granted();
        for i in 0..3 {
            f.mark(i, 3);
        }
        let cmd = f.issue_cmd("DTC-1-ABC");
        f.exec(cmd);

        let events = f.unmark(2, 3);
        assert_eq!(events.len(), 2);
        assert!(!f.entitlement.is_completed());
        assert_eq!(f.entitlement.certificate().code(), Some("DTC-1-ABC"));
    }

    #[test]
    fn zero_unit_products_never_complete() {
        let mut f = granted();
        let events = f.mark(0, 0);
        assert_eq!(events.len(), 1);
        assert!(!f.entitlement.is_completed());
        assert_eq!(f.entitlement.progress(0).percentage, 0);
    }

    #[test]
    fn certificate_requires_completion_and_is_issued_once() {
        let mut f = granted();
        let err = f.entitlement.handle(&f.issue_cmd("DTC-1-A")).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        f.mark(0, 1);
        let cmd = f.issue_cmd("DTC-1-A");
        let events = f.exec(cmd);
        assert_eq!(events.len(), 1);

        let err = f.entitlement.handle(&f.issue_cmd("DTC-2-B")).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyGranted(_)));
        assert_eq!(f.entitlement.certificate().code(), Some("DTC-1-A"));
    }

    #[test]
    fn issuing_for_legacy_record_backfills_completion() {
        let mut f = new_fixture();
        let cmd = EntitlementCommand::ImportLegacy(ImportLegacy {
            entitlement_id: f.id(),
            user: f.user,
            product: f.product,
            purchase: None,
            acquired_at: test_time(),
            price_paid: Amount::ZERO,
            currency: Currency::Usd,
            consumed: BTreeSet::new(),
            completed: true,
            completed_at: None,
            certificate: None,
            occurred_at: test_time(),
        });
        f.exec(cmd);
        assert!(f.entitlement.completed_at().is_none());

        let cmd = f.issue_cmd("DTC-1-LEGACY");
        let events = f.exec(cmd);
        assert_eq!(events.len(), 2);
        match &events[0] {
            EntitlementEvent::CompletionBackfilled(_) => {}
            _ => panic!("Expected CompletionBackfilled event"),
        }
        assert!(f.entitlement.completed_at().is_some());
    }

    #[test]
    fn download_limits_are_enforced() {
        let mut f = granted();
        let download = |f: &Fixture, limits: AccessLimits, at: DateTime<Utc>| {
            EntitlementCommand::RecordDownload(RecordDownload {
                entitlement_id: f.id(),
                file: unit(0),
                limits,
                occurred_at: at,
            })
        };

        let limits = AccessLimits {
            max_downloads: Some(1),
            access_days: None,
        };
        let cmd = download(&f, limits, test_time());
        f.exec(cmd);
        assert_eq!(f.entitlement.downloads(), 1);

        let err = f
            .entitlement
            .handle(&download(&f, limits, test_time()))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        let windowed = AccessLimits {
            max_downloads: None,
            access_days: Some(30),
        };
        let late = test_time() + Duration::days(31);
        let err = f
            .entitlement
            .handle(&download(&f, windowed, late))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        let unbounded = AccessLimits {
            max_downloads: None,
            access_days: Some(u32::MAX),
        };
        let events = f
            .entitlement
            .handle(&download(&f, unbounded, late))
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn revoke_removes_access_and_allows_regrant() {
        let mut f = granted();
        f.mark(0, 5);
        let revoke = EntitlementCommand::RevokeEntitlement(RevokeEntitlement {
            entitlement_id: f.id(),
            purchase: None,
            reason: "removed by admin".to_string(),
            occurred_at: test_time(),
        });

        f.exec(revoke.clone());
        assert!(!f.entitlement.is_active());
        assert!(f.exec(revoke).is_empty());

        let err = f.entitlement.handle(&f.issue_cmd("X")).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));

        let cmd = f.grant_cmd();
        f.exec(cmd);
        assert!(f.entitlement.is_active());
        assert_eq!(f.entitlement.consumed().len(), 1);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: mark then unmark of a new unit restores the previous state.
            #[test]
            fn mark_then_unmark_restores_progress(
                already in prop::collection::btree_set(0u32..10, 0..10),
                target in 10u32..12,
                total in 1u32..12,
            ) {
                let mut f = granted();
                for i in &already {
                    f.mark(*i, total);
                }
                let before = f.entitlement.progress(total);
                let before_cert = f.entitlement.certificate().clone();
                let before_completed_at = f.entitlement.completed_at();

                f.mark(target, total);
                f.unmark(target, total);

                prop_assert_eq!(f.entitlement.progress(total), before);
                prop_assert_eq!(f.entitlement.certificate(), &before_cert);
                prop_assert_eq!(f.entitlement.completed_at(), before_completed_at);
            }

            /// Property: completed implies consumed >= total after any mark sequence.
            #[test]
            fn completed_implies_all_consumed(
                marks in prop::collection::vec(0u32..8, 0..20),
                total in 1u32..8,
            ) {
                let mut f = granted();
                for i in marks {
                    f.mark(i, total);
                }
                let progress = f.entitlement.progress(total);
                if progress.completed {
                    prop_assert!(progress.consumed >= progress.total);
                }
            }
        }
    }
}
