use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coursemart_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use coursemart_events::Event;
use coursemart_pricing::{Amount, Country, Price, PriceTable, RateTable, derive_prices};

use crate::content::{AccessLimits, ContentUnitId, DownloadFile, ProductKind};

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.0
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    id: ProductId,
    title: String,
    category: Option<String>,
    kind: Option<ProductKind>,
    base_price: Option<Amount>,
    legacy_price: Option<Amount>,
    is_free: bool,
    prices: PriceTable,
    active: bool,
    limits: AccessLimits,
    students: u64,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            title: String::new(),
            category: None,
            kind: None,
            base_price: None,
            legacy_price: None,
            is_free: false,
            prices: PriceTable::default(),
            active: false,
            limits: AccessLimits::default(),
            students: 0,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn kind(&self) -> Option<&ProductKind> {
        self.kind.as_ref()
    }

    pub fn base_price(&self) -> Option<Amount> {
        self.base_price
    }

    pub fn legacy_price(&self) -> Option<Amount> {
        self.legacy_price
    }

    pub fn is_free(&self) -> bool {
        self.is_free
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub fn is_active(&self) -> bool {
        self.created && self.active
    }

    pub fn limits(&self) -> AccessLimits {
        self.limits
    }

    pub fn students(&self) -> u64 {
        self.students
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Price charged to a buyer in `country`.
    ///
    /// Resolution order: free (zero in the market currency), derived market
    /// price, USD base price, legacy flat price. `None` means the product
    /// cannot be priced.
    pub fn price_for(&self, country: Country) -> Option<Price> {
        if self.is_free {
            return Some(Price {
                amount: Amount::ZERO,
                currency: country.currency(),
            });
        }
        let usd = |amount| Price {
            amount,
            currency: Country::International.currency(),
        };
        self.prices
            .get(country)
            .or_else(|| self.base_price.map(usd))
            .or_else(|| self.legacy_price.map(usd))
    }

    pub fn total_units(&self) -> u32 {
        self.kind.as_ref().map(ProductKind::total_units).unwrap_or(0)
    }

    pub fn contains_unit(&self, unit: &ContentUnitId) -> bool {
        self.kind.as_ref().is_some_and(|k| k.contains_unit(unit))
    }

    pub fn download_file(&self, id: &ContentUnitId) -> Option<&DownloadFile> {
        self.kind.as_ref().and_then(|k| k.file(id))
    }
}

/// Stream type tag of every product stream.
pub const AGGREGATE_TYPE: &str = "catalog.product";

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
///
/// `base_price` may only be omitted for free products or legacy records that
/// carry a flat `legacy_price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub product_id: ProductId,
    pub title: String,
    pub category: Option<String>,
    pub kind: ProductKind,
    pub base_price: Option<Amount>,
    pub legacy_price: Option<Amount>,
    pub is_free: bool,
    pub limits: AccessLimits,
    pub rates: RateTable,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangePricing (base price and/or free flag).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePricing {
    pub product_id: ProductId,
    pub base_price: Option<Amount>,
    pub is_free: bool,
    pub rates: RateTable,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RefreshPrices (rate table changed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshPrices {
    pub product_id: ProductId,
    pub rates: RateTable,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseContent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviseContent {
    pub product_id: ProductId,
    pub title: String,
    pub category: Option<String>,
    pub kind: ProductKind,
    pub limits: AccessLimits,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeactivateProduct {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactivateProduct {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordEnrollment (a buyer was granted access).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEnrollment {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseEnrollment (an access grant was revoked).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseEnrollment {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    ChangePricing(ChangePricing),
    RefreshPrices(RefreshPrices),
    ReviseContent(ReviseContent),
    DeactivateProduct(DeactivateProduct),
    ReactivateProduct(ReactivateProduct),
    RecordEnrollment(RecordEnrollment),
    ReleaseEnrollment(ReleaseEnrollment),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub product_id: ProductId,
    pub title: String,
    pub category: Option<String>,
    pub kind: ProductKind,
    pub base_price: Option<Amount>,
    pub legacy_price: Option<Amount>,
    pub is_free: bool,
    pub prices: PriceTable,
    pub limits: AccessLimits,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingChanged {
    pub product_id: ProductId,
    pub base_price: Option<Amount>,
    pub is_free: bool,
    pub prices: PriceTable,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricesRecalculated {
    pub product_id: ProductId,
    pub prices: PriceTable,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRevised {
    pub product_id: ProductId,
    pub title: String,
    pub category: Option<String>,
    pub kind: ProductKind,
    pub limits: AccessLimits,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDeactivated {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductReactivated {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecorded {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentReleased {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    PricingChanged(PricingChanged),
    PricesRecalculated(PricesRecalculated),
    ContentRevised(ContentRevised),
    ProductDeactivated(ProductDeactivated),
    ProductReactivated(ProductReactivated),
    EnrollmentRecorded(EnrollmentRecorded),
    EnrollmentReleased(EnrollmentReleased),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "catalog.product.created",
            ProductEvent::PricingChanged(_) => "catalog.product.pricing_changed",
            ProductEvent::PricesRecalculated(_) => "catalog.product.prices_recalculated",
            ProductEvent::ContentRevised(_) => "catalog.product.content_revised",
            ProductEvent::ProductDeactivated(_) => "catalog.product.deactivated",
            ProductEvent::ProductReactivated(_) => "catalog.product.reactivated",
            ProductEvent::EnrollmentRecorded(_) => "catalog.product.enrollment_recorded",
            ProductEvent::EnrollmentReleased(_) => "catalog.product.enrollment_released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::PricingChanged(e) => e.occurred_at,
            ProductEvent::PricesRecalculated(e) => e.occurred_at,
            ProductEvent::ContentRevised(e) => e.occurred_at,
            ProductEvent::ProductDeactivated(e) => e.occurred_at,
            ProductEvent::ProductReactivated(e) => e.occurred_at,
            ProductEvent::EnrollmentRecorded(e) => e.occurred_at,
            ProductEvent::EnrollmentReleased(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.title = e.title.clone();
                self.category = e.category.clone();
                self.kind = Some(e.kind.clone());
                self.base_price = e.base_price;
                self.legacy_price = e.legacy_price;
                self.is_free = e.is_free;
                self.prices = e.prices.clone();
                self.limits = e.limits;
                self.active = true;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ProductEvent::PricingChanged(e) => {
                self.base_price = e.base_price;
                self.is_free = e.is_free;
                self.prices = e.prices.clone();
            }
            ProductEvent::PricesRecalculated(e) => {
                self.prices = e.prices.clone();
            }
            ProductEvent::ContentRevised(e) => {
                self.title = e.title.clone();
                self.category = e.category.clone();
                self.kind = Some(e.kind.clone());
                self.limits = e.limits;
            }
            ProductEvent::ProductDeactivated(_) => {
                self.active = false;
            }
            ProductEvent::ProductReactivated(_) => {
                self.active = true;
            }
            ProductEvent::EnrollmentRecorded(_) => {
                self.students += 1;
            }
            ProductEvent::EnrollmentReleased(_) => {
                self.students = self.students.saturating_sub(1);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::ChangePricing(cmd) => self.handle_change_pricing(cmd),
            ProductCommand::RefreshPrices(cmd) => self.handle_refresh(cmd),
            ProductCommand::ReviseContent(cmd) => self.handle_revise(cmd),
            ProductCommand::DeactivateProduct(cmd) => self.handle_deactivate(cmd),
            ProductCommand::ReactivateProduct(cmd) => self.handle_reactivate(cmd),
            ProductCommand::RecordEnrollment(cmd) => self.handle_record_enrollment(cmd),
            ProductCommand::ReleaseEnrollment(cmd) => self.handle_release_enrollment(cmd),
        }
    }
}

/// Prices for a (base, free) pair. Legacy records without a base price have
/// no derived table and fall back to their flat price.
fn price_table(
    base_price: Option<Amount>,
    is_free: bool,
    rates: &RateTable,
) -> Result<PriceTable, DomainError> {
    match (base_price, is_free) {
        (Some(base), free) => Ok(derive_prices(base, free, rates)?),
        (None, true) => Ok(derive_prices(Amount::ZERO, true, rates)?),
        (None, false) => Ok(PriceTable::default()),
    }
}

impl Product {
    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("product {}", self.id)));
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::validation("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        self.ensure_product_id(cmd.product_id)?;

        if cmd.title.trim().is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        if cmd.base_price.is_none() && cmd.legacy_price.is_none() && !cmd.is_free {
            return Err(DomainError::validation(
                "a paid product needs a base price in USD",
            ));
        }
        if cmd.legacy_price.is_some_and(Amount::is_negative) {
            return Err(DomainError::validation("legacy price must be >= 0"));
        }
        cmd.kind.validate()?;

        let prices = price_table(cmd.base_price, cmd.is_free, &cmd.rates)?;

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            product_id: cmd.product_id,
            title: cmd.title.trim().to_string(),
            category: cmd.category.clone(),
            kind: cmd.kind.clone(),
            base_price: cmd.base_price,
            legacy_price: cmd.legacy_price,
            is_free: cmd.is_free,
            prices,
            limits: cmd.limits,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_pricing(&self, cmd: &ChangePricing) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_product_id(cmd.product_id)?;

        if cmd.base_price.is_none() && self.legacy_price.is_none() && !cmd.is_free {
            return Err(DomainError::validation(
                "a paid product needs a base price in USD",
            ));
        }

        let prices = price_table(cmd.base_price, cmd.is_free, &cmd.rates)?;

        Ok(vec![ProductEvent::PricingChanged(PricingChanged {
            product_id: cmd.product_id,
            base_price: cmd.base_price,
            is_free: cmd.is_free,
            prices,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refresh(&self, cmd: &RefreshPrices) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_product_id(cmd.product_id)?;

        let prices = price_table(self.base_price, self.is_free, &cmd.rates)?;
        if prices == self.prices {
            return Ok(vec![]);
        }

        Ok(vec![ProductEvent::PricesRecalculated(PricesRecalculated {
            product_id: cmd.product_id,
            prices,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revise(&self, cmd: &ReviseContent) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_product_id(cmd.product_id)?;

        if cmd.title.trim().is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        if let Some(current) = &self.kind {
            if current.tag() != cmd.kind.tag() {
                return Err(DomainError::validation(format!(
                    "product kind cannot change from {} to {}",
                    current.tag(),
                    cmd.kind.tag()
                )));
            }
        }
        cmd.kind.validate()?;

        Ok(vec![ProductEvent::ContentRevised(ContentRevised {
            product_id: cmd.product_id,
            title: cmd.title.trim().to_string(),
            category: cmd.category.clone(),
            kind: cmd.kind.clone(),
            limits: cmd.limits,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_product_id(cmd.product_id)?;

        if !self.active {
            return Err(DomainError::invalid_state("product is already inactive"));
        }

        Ok(vec![ProductEvent::ProductDeactivated(ProductDeactivated {
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reactivate(&self, cmd: &ReactivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_product_id(cmd.product_id)?;

        if self.active {
            return Err(DomainError::invalid_state("product is already active"));
        }

        Ok(vec![ProductEvent::ProductReactivated(ProductReactivated {
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_enrollment(
        &self,
        cmd: &RecordEnrollment,
    ) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_product_id(cmd.product_id)?;

        Ok(vec![ProductEvent::EnrollmentRecorded(EnrollmentRecorded {
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release_enrollment(
        &self,
        cmd: &ReleaseEnrollment,
    ) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_product_id(cmd.product_id)?;

        if self.students == 0 {
            return Ok(vec![]);
        }

        Ok(vec![ProductEvent::EnrollmentReleased(EnrollmentReleased {
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
