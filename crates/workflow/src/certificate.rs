use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coursemart_catalog::{Product, ProductId};
use coursemart_core::{DomainError, UserId};
use coursemart_entitlements::{CertificateStatus, Entitlement, EntitlementCommand, IssueCertificate};
use coursemart_infra::command_dispatcher::DispatchError;

use crate::context::MarketContext;
use crate::error::{WorkflowError, WorkflowResult};
use crate::ports::DEFAULT_STUDENT_NAME;

pub const DEFAULT_DURATION_LABEL: &str = "N/A";
pub const DEFAULT_CATEGORY: &str = "General";

/// Fresh codes tried before giving up on a collision streak.
const MAX_CODE_ATTEMPTS: usize = 5;

const RANDOM_LEN: usize = 9;
const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Source of certificate codes.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self, prefix: &str, now: DateTime<Utc>) -> String;
}

/// `<PREFIX>-<epoch millis>-<9 random base36 characters>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeRandomCodes;

impl CodeGenerator for TimeRandomCodes {
    fn generate(&self, prefix: &str, now: DateTime<Utc>) -> String {
        let mut bits = uuid::Uuid::new_v4().as_u128();
        let mut random = String::with_capacity(RANDOM_LEN);
        for _ in 0..RANDOM_LEN {
            random.push(BASE36[(bits % 36) as usize] as char);
            bits /= 36;
        }
        format!("{prefix}-{}-{random}", now.timestamp_millis())
    }
}

/// What a certificate shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub code: String,
    pub student_name: String,
    pub product_title: String,
    pub completed_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub duration: String,
    pub category: String,
}

/// Completion certificates: one code per entitlement, ever.
#[derive(Clone)]
pub struct CertificateIssuer {
    ctx: Arc<MarketContext>,
    codes: Arc<dyn CodeGenerator>,
}

impl core::fmt::Debug for CertificateIssuer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CertificateIssuer").finish_non_exhaustive()
    }
}

impl CertificateIssuer {
    pub(crate) fn new(ctx: Arc<MarketContext>, codes: Arc<dyn CodeGenerator>) -> Self {
        Self { ctx, codes }
    }

    /// Return the certificate of a completed product, issuing it on first
    /// request. Later calls, concurrent ones included, see the same code
    /// while the product stays completed.
    pub async fn get_or_issue(
        &self,
        user: UserId,
        product_id: ProductId,
    ) -> WorkflowResult<CertificateRecord> {
        let product = self.ctx.product(product_id)?;
        let entitlement = self.ctx.active_entitlement(user, product_id)?;

        if !entitlement.is_completed() {
            return Err(WorkflowError::NotCompleted {
                consumed: entitlement.consumed().len() as u32,
                total: product.total_units(),
            });
        }
        // An issued code survives an unmark and is served again on re-completion.
        if matches!(entitlement.certificate(), CertificateStatus::Issued { .. }) {
            return self.record(&entitlement, &product).await;
        }
        if entitlement.completed_at().is_none() {
            tracing::warn!(%user, product = %product_id, "completion timestamp missing, backfilling");
        }

        let now = Utc::now();
        let code = self.fresh_code(now)?;
        let entitlement_id = entitlement.id_typed();
        let issued = match self.ctx.execute_entitlement(
            entitlement_id,
            EntitlementCommand::IssueCertificate(IssueCertificate {
                entitlement_id,
                code,
                occurred_at: now,
            }),
        ) {
            Ok(out) => {
                tracing::info!(
                    %user,
                    product = %product_id,
                    code = out.aggregate.certificate().code().unwrap_or_default(),
                    "certificate issued"
                );
                out.aggregate
            }
            Err(DispatchError::Domain(DomainError::AlreadyGranted(_))) => {
                tracing::debug!(%user, product = %product_id, "certificate issued concurrently");
                self.ctx.load_entitlement(user, product_id)?
            }
            Err(DispatchError::Domain(DomainError::NotFound(_))) => {
                return Err(WorkflowError::NotEntitled(product_id));
            }
            Err(err) => return Err(err.into()),
        };

        self.record(&issued, &product).await
    }

    /// Look a certificate up by its code. Revoked access does not invalidate
    /// an issued certificate.
    pub async fn verify(&self, code: &str) -> WorkflowResult<CertificateRecord> {
        let not_found = || WorkflowError::NotFound(format!("certificate {code}"));
        let entitlement = self
            .ctx
            .entitlements
            .by_certificate_code(code)
            .ok_or_else(not_found)?;
        let product_id = entitlement.product().ok_or_else(not_found)?;
        let product = self.ctx.product(product_id)?;
        self.record(&entitlement, &product).await
    }

    fn fresh_code(&self, now: DateTime<Utc>) -> WorkflowResult<String> {
        let prefix = &self.ctx.config.certificate_prefix;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = self.codes.generate(prefix, now);
            if !self.ctx.entitlements.is_code_taken(&code) {
                return Ok(code);
            }
            tracing::warn!(%code, "certificate code collision, regenerating");
        }
        Err(WorkflowError::Conflict(format!(
            "no unused certificate code after {MAX_CODE_ATTEMPTS} attempts"
        )))
    }

    async fn record(
        &self,
        entitlement: &Entitlement,
        product: &Product,
    ) -> WorkflowResult<CertificateRecord> {
        let CertificateStatus::Issued { code, issued_at } = entitlement.certificate() else {
            return Err(WorkflowError::InvalidState(
                "certificate has not been issued".to_string(),
            ));
        };

        let student_name = match entitlement.user() {
            Some(user) => self.ctx.profile(user).await.name,
            None => String::new(),
        };
        let student_name = if student_name.trim().is_empty() {
            DEFAULT_STUDENT_NAME.to_string()
        } else {
            student_name
        };

        Ok(CertificateRecord {
            code: code.clone(),
            student_name,
            product_title: product.title().to_string(),
            completed_at: entitlement.completed_at().unwrap_or(*issued_at),
            issued_at: *issued_at,
            duration: product
                .kind()
                .and_then(|kind| kind.duration_label())
                .unwrap_or(DEFAULT_DURATION_LABEL)
                .to_string(),
            category: product.category().unwrap_or(DEFAULT_CATEGORY).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 123_000_000).expect("valid timestamp")
    }

    #[test]
    fn codes_carry_prefix_millis_and_nine_base36_chars() {
        let code = TimeRandomCodes.generate("DTC", test_time());
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "DTC");
        assert_eq!(parts[1], "1700000000123");
        assert_eq!(parts[2].len(), 9);
        assert!(
            parts[2]
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }

    #[test]
    fn consecutive_codes_differ() {
        let a = TimeRandomCodes.generate("DTC", test_time());
        let b = TimeRandomCodes.generate("DTC", test_time());
        assert_ne!(a, b);
    }
}
