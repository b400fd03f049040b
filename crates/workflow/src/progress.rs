use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use coursemart_catalog::{ContentUnitId, DownloadFile, Product, ProductId};
use coursemart_core::{DomainError, UserId};
use coursemart_entitlements::{
    Entitlement, EntitlementCommand, EntitlementId, ImportLegacy, LegacyCertificate,
    MarkUnitSeen, Progress, RecordDownload, UnmarkUnitSeen,
};
use coursemart_infra::command_dispatcher::DispatchError;
use coursemart_pricing::{Amount, Currency};
use coursemart_purchasing::PurchaseId;

use crate::context::MarketContext;
use crate::error::{WorkflowError, WorkflowResult};
use crate::grant::{record_enrollment, revoke};

/// One row of a user's library.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    pub entitlement: Entitlement,
    pub product: Product,
    pub progress: Progress,
}

/// Access record carried over from a previous system.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyAccess {
    pub user: UserId,
    pub product: ProductId,
    pub purchase: Option<PurchaseId>,
    pub acquired_at: DateTime<Utc>,
    pub price_paid: Amount,
    pub currency: Currency,
    pub consumed: Vec<ContentUnitId>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub certificate: Option<LegacyCertificate>,
}

/// Per-user consumption of purchased content.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    ctx: Arc<MarketContext>,
}

impl ProgressTracker {
    pub(crate) fn new(ctx: Arc<MarketContext>) -> Self {
        Self { ctx }
    }

    /// Record `unit` as seen. Marking twice counts once; reaching every unit
    /// completes the entitlement.
    pub fn mark_unit_seen(
        &self,
        user: UserId,
        product_id: ProductId,
        unit: &ContentUnitId,
    ) -> WorkflowResult<Progress> {
        let product = self.ctx.product(product_id)?;
        let entitlement = self.ctx.active_entitlement(user, product_id)?;
        ensure_unit(&product, unit)?;
        let entitlement_id = entitlement.id_typed();
        let total_units = product.total_units();

        let out = self
            .ctx
            .execute_entitlement(
                entitlement_id,
                EntitlementCommand::MarkUnitSeen(MarkUnitSeen {
                    entitlement_id,
                    unit: unit.clone(),
                    total_units,
                    occurred_at: Utc::now(),
                }),
            )
            .map_err(|err| revoked_as_not_entitled(err, product_id))?;

        if !entitlement.is_completed() && out.aggregate.is_completed() {
            tracing::info!(%user, product = %product_id, "product completed");
        }
        Ok(out.aggregate.progress(total_units))
    }

    /// Remove `unit` from the seen set. Completion reverts when the count
    /// drops below the total; an issued certificate is kept.
    pub fn unmark_unit_seen(
        &self,
        user: UserId,
        product_id: ProductId,
        unit: &ContentUnitId,
    ) -> WorkflowResult<Progress> {
        let product = self.ctx.product(product_id)?;
        let entitlement = self.ctx.active_entitlement(user, product_id)?;
        ensure_unit(&product, unit)?;
        let entitlement_id = entitlement.id_typed();
        let total_units = product.total_units();

        let out = self
            .ctx
            .execute_entitlement(
                entitlement_id,
                EntitlementCommand::UnmarkUnitSeen(UnmarkUnitSeen {
                    entitlement_id,
                    unit: unit.clone(),
                    total_units,
                    occurred_at: Utc::now(),
                }),
            )
            .map_err(|err| revoked_as_not_entitled(err, product_id))?;

        if entitlement.is_completed() && !out.aggregate.is_completed() {
            tracing::info!(%user, product = %product_id, "completion reverted");
        }
        Ok(out.aggregate.progress(total_units))
    }

    pub fn progress(&self, user: UserId, product_id: ProductId) -> WorkflowResult<Progress> {
        let product = self.ctx.product(product_id)?;
        let entitlement = self.ctx.active_entitlement(user, product_id)?;
        Ok(entitlement.progress(product.total_units()))
    }

    /// Topics across all modules for courses, files for downloads.
    pub fn total_units(&self, product_id: ProductId) -> WorkflowResult<u32> {
        Ok(self.ctx.product(product_id)?.total_units())
    }

    /// Active entitlements of `user`, most recently acquired first.
    pub fn library(&self, user: UserId) -> Vec<LibraryEntry> {
        self.ctx
            .entitlements
            .library(user)
            .into_iter()
            .filter_map(|entitlement| {
                let product = self.ctx.products.get(entitlement.product()?)?;
                let progress = entitlement.progress(product.total_units());
                Some(LibraryEntry {
                    entitlement,
                    product,
                    progress,
                })
            })
            .collect()
    }

    /// Check the access window and download quota, count the download and
    /// hand out the file.
    pub fn authorize_download(
        &self,
        user: UserId,
        product_id: ProductId,
        file: &ContentUnitId,
    ) -> WorkflowResult<DownloadFile> {
        let product = self.ctx.product(product_id)?;
        let Some(download) = product.download_file(file).cloned() else {
            return Err(WorkflowError::NotFound(format!(
                "file {file} of product {product_id}"
            )));
        };
        let entitlement = self.ctx.active_entitlement(user, product_id)?;
        let entitlement_id = entitlement.id_typed();

        let out = self
            .ctx
            .execute_entitlement(
                entitlement_id,
                EntitlementCommand::RecordDownload(RecordDownload {
                    entitlement_id,
                    file: file.clone(),
                    limits: product.limits(),
                    occurred_at: Utc::now(),
                }),
            )
            .map_err(|err| revoked_as_not_entitled(err, product_id))?;

        tracing::info!(
            %user,
            product = %product_id,
            %file,
            downloads = out.aggregate.downloads(),
            "download authorized"
        );
        Ok(download)
    }

    /// Take access away outside of a purchase reversal.
    pub fn revoke_access(
        &self,
        admin: UserId,
        user: UserId,
        product_id: ProductId,
        reason: &str,
    ) -> WorkflowResult<Entitlement> {
        let entitlement = self.ctx.active_entitlement(user, product_id)?;
        tracing::debug!(%admin, %user, product = %product_id, "manual revocation requested");
        match revoke(&self.ctx, &entitlement, None, reason)? {
            Some(revoked) => Ok(revoked),
            None => Err(WorkflowError::NotEntitled(product_id)),
        }
    }

    /// Load an access record from a previous system. Units the product no
    /// longer has are dropped.
    pub fn import_legacy(&self, access: LegacyAccess) -> WorkflowResult<Entitlement> {
        let product = self.ctx.product(access.product)?;

        let mut consumed = BTreeSet::new();
        for unit in access.consumed {
            if product.contains_unit(&unit) {
                consumed.insert(unit);
            } else {
                tracing::warn!(product = %access.product, %unit, "dropping unknown legacy unit");
            }
        }

        let entitlement_id = EntitlementId::for_pair(access.user, access.product);
        let out = self.ctx.execute_entitlement(
            entitlement_id,
            EntitlementCommand::ImportLegacy(ImportLegacy {
                entitlement_id,
                user: access.user,
                product: access.product,
                purchase: access.purchase,
                acquired_at: access.acquired_at,
                price_paid: access.price_paid,
                currency: access.currency,
                consumed,
                completed: access.completed,
                completed_at: access.completed_at,
                certificate: access.certificate,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(user = %access.user, product = %access.product, "legacy access imported");
        record_enrollment(&self.ctx, access.product);
        Ok(out.aggregate)
    }
}

fn ensure_unit(product: &Product, unit: &ContentUnitId) -> WorkflowResult<()> {
    if !product.contains_unit(unit) {
        return Err(WorkflowError::UnknownUnit {
            product: product.id_typed(),
            unit: unit.clone(),
        });
    }
    Ok(())
}

/// The entitlement was revoked between the read and the append.
fn revoked_as_not_entitled(err: DispatchError, product_id: ProductId) -> WorkflowError {
    match err {
        DispatchError::Domain(DomainError::NotFound(_)) => WorkflowError::NotEntitled(product_id),
        other => other.into(),
    }
}
