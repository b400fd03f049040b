use serde_json::Value as JsonValue;

use coursemart_catalog::ProductId;
use coursemart_core::UserId;
use coursemart_entitlements::{ENTITLEMENT_AGGREGATE_TYPE, Entitlement, EntitlementId};
use coursemart_events::EventEnvelope;

use crate::event_store::EventStore;
use crate::read_model::{InMemoryReadStore, ReadStore};

use super::snapshot::{ProjectionError, SnapshotProjection};

/// Entitlement snapshots plus an index of issued certificate codes.
#[derive(Debug)]
pub struct EntitlementProjection {
    snapshots: SnapshotProjection<Entitlement>,
    certificates: InMemoryReadStore<String, EntitlementId>,
}

impl Default for EntitlementProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl EntitlementProjection {
    pub fn new() -> Self {
        Self {
            snapshots: SnapshotProjection::in_memory(ENTITLEMENT_AGGREGATE_TYPE, |id| {
                Entitlement::empty(EntitlementId(id))
            }),
            certificates: InMemoryReadStore::new(),
        }
    }

    pub fn refresh(&self, entitlement: &Entitlement) {
        if !entitlement.exists() {
            return;
        }
        self.snapshots.refresh(entitlement.id_typed().aggregate_id(), entitlement);
        self.index(entitlement);
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        store: &dyn EventStore,
    ) -> Result<Option<Entitlement>, ProjectionError> {
        let updated = self.snapshots.apply_envelope(envelope, store)?;
        if let Some(entitlement) = &updated {
            self.index(entitlement);
        }
        Ok(updated)
    }

    pub fn rebuild(&self, store: &dyn EventStore) -> Result<usize, ProjectionError> {
        self.certificates.clear();
        let rebuilt = self.snapshots.rebuild(store)?;
        for entitlement in self.snapshots.list() {
            self.index(&entitlement);
        }
        Ok(rebuilt)
    }

    pub fn get(&self, user: UserId, product: ProductId) -> Option<Entitlement> {
        self.snapshots
            .get(EntitlementId::for_pair(user, product).aggregate_id())
    }

    /// Active entitlements of `user`, most recently acquired first.
    pub fn library(&self, user: UserId) -> Vec<Entitlement> {
        let mut out: Vec<Entitlement> = self
            .snapshots
            .list()
            .into_iter()
            .filter(|e| e.is_active() && e.user() == Some(user))
            .collect();
        out.sort_by(|a, b| {
            b.acquired_at()
                .cmp(&a.acquired_at())
                .then_with(|| a.id_typed().cmp(&b.id_typed()))
        });
        out
    }

    /// Entitlement holding the issued certificate `code`.
    pub fn by_certificate_code(&self, code: &str) -> Option<Entitlement> {
        self.certificates
            .get(&code.to_string())
            .and_then(|id| self.snapshots.get(id.aggregate_id()))
    }

    pub fn is_code_taken(&self, code: &str) -> bool {
        self.certificates.get(&code.to_string()).is_some()
    }

    fn index(&self, entitlement: &Entitlement) {
        if let Some(code) = entitlement.certificate().code() {
            self.certificates.upsert(code.to_string(), entitlement.id_typed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use coursemart_catalog::ContentUnitId;
    use coursemart_core::{Aggregate, AggregateId};
    use coursemart_entitlements::{
        EntitlementCommand, GrantEntitlement, IssueCertificate, MarkUnitSeen, RevokeEntitlement,
    };
    use coursemart_pricing::{Amount, Currency};
    use coursemart_purchasing::PurchaseId;

    fn test_time(offset_minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(offset_minutes)
    }

    fn exec(entitlement: &mut Entitlement, cmd: EntitlementCommand) {
        for e in entitlement.handle(&cmd).unwrap() {
            entitlement.apply(&e);
        }
    }

    fn granted(user: UserId, product: ProductId, at: i64) -> Entitlement {
        let id = EntitlementId::for_pair(user, product);
        let mut entitlement = Entitlement::empty(id);
        exec(
            &mut entitlement,
            EntitlementCommand::GrantEntitlement(GrantEntitlement {
                entitlement_id: id,
                user,
                product,
                purchase: PurchaseId::new(AggregateId::new()),
                price_paid: Amount::from_cents(4999),
                currency: Currency::Usd,
                occurred_at: test_time(at),
            }),
        );
        entitlement
    }

    fn product() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    #[test]
    fn library_holds_active_entitlements_newest_first() {
        let projection = EntitlementProjection::new();
        let user = UserId::new();

        let first = granted(user, product(), 0);
        let second = granted(user, product(), 10);
        let mut revoked = granted(user, product(), 20);
        let id = revoked.id_typed();
        exec(
            &mut revoked,
            EntitlementCommand::RevokeEntitlement(RevokeEntitlement {
                entitlement_id: id,
                purchase: None,
                reason: "removed by admin".to_string(),
                occurred_at: test_time(21),
            }),
        );
        for e in [&first, &second, &revoked] {
            projection.refresh(e);
        }
        projection.refresh(&granted(UserId::new(), product(), 30));

        let library = projection.library(user);
        assert_eq!(library.len(), 2);
        assert_eq!(library[0].id_typed(), second.id_typed());
        assert_eq!(library[1].id_typed(), first.id_typed());
    }

    #[test]
    fn certificate_codes_are_indexed() {
        let projection = EntitlementProjection::new();
        let user = UserId::new();
        let mut entitlement = granted(user, product(), 0);
        let id = entitlement.id_typed();
        exec(
            &mut entitlement,
            EntitlementCommand::MarkUnitSeen(MarkUnitSeen {
                entitlement_id: id,
                unit: ContentUnitId::from("t1"),
                total_units: 1,
                occurred_at: test_time(1),
            }),
        );
        exec(
            &mut entitlement,
            EntitlementCommand::IssueCertificate(IssueCertificate {
                entitlement_id: id,
                code: "CERT-1".to_string(),
                occurred_at: test_time(2),
            }),
        );
        projection.refresh(&entitlement);

        assert!(projection.is_code_taken("CERT-1"));
        assert!(!projection.is_code_taken("CERT-2"));
        assert_eq!(
            projection.by_certificate_code("CERT-1").map(|e| e.id_typed()),
            Some(id)
        );
    }
}
