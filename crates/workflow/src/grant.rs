//! Turning a granting purchase into entitlements, and back.

use chrono::Utc;

use coursemart_catalog::{ProductCommand, ProductId, RecordEnrollment, ReleaseEnrollment};
use coursemart_core::DomainError;
use coursemart_entitlements::{
    Entitlement, EntitlementCommand, EntitlementId, GrantEntitlement, RevokeEntitlement,
};
use coursemart_infra::command_dispatcher::DispatchError;
use coursemart_purchasing::Purchase;

use crate::context::MarketContext;
use crate::error::WorkflowResult;

/// Grant every line of `purchase` the buyer is not already entitled to.
///
/// Safe to repeat: an existing active entitlement is left untouched and the
/// enrollment counter only moves when a grant is actually committed. Returns
/// the entitlements created by this call.
pub(crate) fn grant_purchase(
    ctx: &MarketContext,
    purchase: &Purchase,
) -> WorkflowResult<Vec<Entitlement>> {
    let Some(user) = purchase.user() else {
        return Ok(vec![]);
    };

    let mut granted = Vec::new();
    for line in purchase.lines() {
        let entitlement_id = EntitlementId::for_pair(user, line.product_id);
        let command = EntitlementCommand::GrantEntitlement(GrantEntitlement {
            entitlement_id,
            user,
            product: line.product_id,
            purchase: purchase.id_typed(),
            price_paid: line.unit_price,
            currency: line.currency,
            occurred_at: Utc::now(),
        });

        match ctx.execute_entitlement(entitlement_id, command) {
            Ok(out) => {
                tracing::info!(
                    %user,
                    product = %line.product_id,
                    purchase = %purchase.id_typed(),
                    "entitlement granted"
                );
                record_enrollment(ctx, line.product_id);
                granted.push(out.aggregate);
            }
            Err(DispatchError::Domain(DomainError::AlreadyGranted(_))) => {
                tracing::debug!(
                    %user,
                    product = %line.product_id,
                    "already entitled, grant skipped"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(granted)
}

/// Revoke the entitlements that exist only because of `purchase`.
///
/// A line is kept while another granting purchase of the same buyer covers
/// the product, or when the access was imported without a purchase record.
/// Returns the entitlements revoked by this call.
pub(crate) fn revoke_purchase(
    ctx: &MarketContext,
    purchase: &Purchase,
    reason: &str,
) -> WorkflowResult<Vec<Entitlement>> {
    let Some(user) = purchase.user() else {
        return Ok(vec![]);
    };

    let mut revoked = Vec::new();
    for line in purchase.lines() {
        let entitlement = ctx.load_entitlement(user, line.product_id)?;
        if !entitlement.is_active() {
            continue;
        }
        if is_legacy_access(ctx, &entitlement, purchase) {
            tracing::debug!(
                %user,
                product = %line.product_id,
                "imported access, entitlement kept"
            );
            continue;
        }

        let covered_elsewhere = ctx
            .purchases
            .granting(user, line.product_id)
            .iter()
            .any(|p| p.id_typed() != purchase.id_typed());
        if covered_elsewhere {
            tracing::debug!(
                %user,
                product = %line.product_id,
                "access covered by another purchase, entitlement kept"
            );
            continue;
        }

        if let Some(entitlement) = revoke(ctx, &entitlement, Some(purchase), reason)? {
            revoked.push(entitlement);
        }
    }
    Ok(revoked)
}

fn is_legacy_access(
    ctx: &MarketContext,
    entitlement: &Entitlement,
    purchase: &Purchase,
) -> bool {
    match entitlement.source_purchase() {
        None => true,
        Some(source) if source == purchase.id_typed() => false,
        Some(source) => ctx.purchases.get(source).is_none(),
    }
}

/// Revoke one entitlement. `None` when it was already inactive.
pub(crate) fn revoke(
    ctx: &MarketContext,
    entitlement: &Entitlement,
    purchase: Option<&Purchase>,
    reason: &str,
) -> WorkflowResult<Option<Entitlement>> {
    let entitlement_id = entitlement.id_typed();
    let out = ctx.execute_entitlement(
        entitlement_id,
        EntitlementCommand::RevokeEntitlement(RevokeEntitlement {
            entitlement_id,
            purchase: purchase.map(Purchase::id_typed),
            reason: reason.to_string(),
            occurred_at: Utc::now(),
        }),
    )?;
    if out.is_noop() {
        return Ok(None);
    }

    if let Some(product) = out.aggregate.product() {
        tracing::info!(
            user = ?out.aggregate.user(),
            %product,
            reason,
            "entitlement revoked"
        );
        release_enrollment(ctx, product);
    }
    Ok(Some(out.aggregate))
}

pub(crate) fn record_enrollment(ctx: &MarketContext, product: ProductId) {
    adjust_enrollment(ctx, product, || {
        ProductCommand::RecordEnrollment(RecordEnrollment {
            product_id: product,
            occurred_at: Utc::now(),
        })
    });
}

fn release_enrollment(ctx: &MarketContext, product: ProductId) {
    adjust_enrollment(ctx, product, || {
        ProductCommand::ReleaseEnrollment(ReleaseEnrollment {
            product_id: product,
            occurred_at: Utc::now(),
        })
    });
}

/// Enrollment changes commute; a lost race is retried until it commits.
fn adjust_enrollment(
    ctx: &MarketContext,
    product: ProductId,
    command: impl Fn() -> ProductCommand,
) {
    loop {
        match ctx.execute_product(product, command()) {
            Ok(_) => return,
            Err(DispatchError::Concurrency(message)) => {
                tracing::debug!(%product, %message, "enrollment update contended, retrying");
                std::thread::yield_now();
            }
            Err(err) => {
                tracing::warn!(%product, error = %err, "failed to update enrollment");
                return;
            }
        }
    }
}
