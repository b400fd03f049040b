use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;

use coursemart_catalog::{
    AccessLimits, ChangePricing, CreateProduct, DeactivateProduct, Product, ProductCommand,
    ProductId, ProductKind, ReactivateProduct, RefreshPrices, ReviseContent,
};
use coursemart_core::AggregateId;
use coursemart_pricing::{Amount, RateTable};

use crate::context::MarketContext;
use crate::error::WorkflowResult;

/// Input of [`CatalogService::create`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub title: String,
    pub category: Option<String>,
    pub kind: ProductKind,
    pub base_price: Option<Amount>,
    pub legacy_price: Option<Amount>,
    pub is_free: bool,
    pub limits: AccessLimits,
}

/// Input of [`CatalogService::revise`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRevision {
    pub title: String,
    pub category: Option<String>,
    pub kind: ProductKind,
    pub limits: AccessLimits,
}

/// Product administration and storefront lookups.
#[derive(Debug, Clone)]
pub struct CatalogService {
    ctx: Arc<MarketContext>,
}

impl CatalogService {
    pub(crate) fn new(ctx: Arc<MarketContext>) -> Self {
        Self { ctx }
    }

    pub fn create(&self, product: NewProduct) -> WorkflowResult<Product> {
        let product_id = ProductId::new(AggregateId::new());
        let out = self.ctx.execute_product(
            product_id,
            ProductCommand::CreateProduct(CreateProduct {
                product_id,
                title: product.title,
                category: product.category,
                kind: product.kind,
                base_price: product.base_price,
                legacy_price: product.legacy_price,
                is_free: product.is_free,
                limits: product.limits,
                rates: self.ctx.rates(),
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(product = %product_id, title = out.aggregate.title(), "product created");
        Ok(out.aggregate)
    }

    /// Change the USD base price and/or the free flag; market prices are
    /// derived again from the current rates.
    pub fn reprice(
        &self,
        product_id: ProductId,
        base_price: Option<Amount>,
        is_free: bool,
    ) -> WorkflowResult<Product> {
        self.ctx.product(product_id)?;
        let out = self.ctx.execute_product(
            product_id,
            ProductCommand::ChangePricing(ChangePricing {
                product_id,
                base_price,
                is_free,
                rates: self.ctx.rates(),
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(out.aggregate)
    }

    /// Install a new rate table and derive every product's prices from it.
    /// Returns how many products changed.
    pub fn update_rates(&self, rates: RateTable) -> WorkflowResult<usize> {
        self.ctx.set_rates(rates.clone());

        let mut changed = 0;
        for product in self.ctx.products.all() {
            let product_id = product.id_typed();
            let out = self.ctx.execute_product(
                product_id,
                ProductCommand::RefreshPrices(RefreshPrices {
                    product_id,
                    rates: rates.clone(),
                    occurred_at: Utc::now(),
                }),
            )?;
            if !out.is_noop() {
                changed += 1;
            }
        }
        tracing::info!(changed, "market prices recalculated");
        Ok(changed)
    }

    pub fn revise(&self, product_id: ProductId, revision: ContentRevision) -> WorkflowResult<Product> {
        self.ctx.product(product_id)?;
        let out = self.ctx.execute_product(
            product_id,
            ProductCommand::ReviseContent(ReviseContent {
                product_id,
                title: revision.title,
                category: revision.category,
                kind: revision.kind,
                limits: revision.limits,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(out.aggregate)
    }

    /// Soft delete: the product leaves the storefront, existing access stays.
    pub fn deactivate(&self, product_id: ProductId) -> WorkflowResult<Product> {
        self.ctx.product(product_id)?;
        let out = self.ctx.execute_product(
            product_id,
            ProductCommand::DeactivateProduct(DeactivateProduct {
                product_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(out.aggregate)
    }

    pub fn reactivate(&self, product_id: ProductId) -> WorkflowResult<Product> {
        self.ctx.product(product_id)?;
        let out = self.ctx.execute_product(
            product_id,
            ProductCommand::ReactivateProduct(ReactivateProduct {
                product_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(out.aggregate)
    }

    pub fn get(&self, product_id: ProductId) -> WorkflowResult<Product> {
        self.ctx.product(product_id)
    }

    /// Active products among `ids`; inactive and unknown ids are left out.
    pub fn active_products(&self, ids: &[ProductId]) -> Vec<Product> {
        let wanted: BTreeSet<ProductId> = ids.iter().copied().collect();
        wanted
            .into_iter()
            .filter_map(|id| self.ctx.products.get(id))
            .filter(Product::is_active)
            .collect()
    }

    /// The storefront: every active product, ordered by title.
    pub fn list_active(&self) -> Vec<Product> {
        self.ctx.products.active()
    }
}
