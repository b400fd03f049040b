//! Catalog domain module (event-sourced).
//!
//! Products are the sellable units of the marketplace: courses made of modules
//! and topics, or downloadable resources made of files. Prices are derived
//! from the USD base price by `coursemart-pricing`, never authored.

pub mod content;
pub mod product;

pub use content::{
    AccessLimits, ContentUnitId, CourseLevel, CourseModule, DownloadFile, DownloadFormat,
    ProductKind, Topic,
};
pub use product::{
    AGGREGATE_TYPE as PRODUCT_AGGREGATE_TYPE,
    ChangePricing, ContentRevised, CreateProduct, DeactivateProduct, EnrollmentRecorded,
    EnrollmentReleased, PricesRecalculated, PricingChanged, Product, ProductCommand,
    ProductCreated, ProductDeactivated, ProductEvent, ProductId, ProductReactivated,
    ReactivateProduct, RecordEnrollment, RefreshPrices, ReleaseEnrollment, ReviseContent,
};
