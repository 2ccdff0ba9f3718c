//! Repository module for database CRUD operations
//!
//! One repository per resource. Every query on tenant-owned data filters by
//! the caller's tenant.

pub mod audit;
pub mod batch;
pub mod prescription;
pub mod product;
pub mod reorder;
pub mod report;
pub mod sale;
pub mod stock;
pub mod supplier;
pub mod tenant;
pub mod user;

pub use audit::{AuditFilter, AuditRepository};
pub use batch::{BatchFilter, BatchListing, BatchRepository};
pub use prescription::{PrescriptionFilter, PrescriptionRepository};
pub use product::{ProductFilter, ProductRepository};
pub use reorder::ReorderRepository;
pub use report::{DailySales, PrescriptionCounts, RecentPrescription, ReportRepository, SalesAggregate, TopProduct};
pub use sale::{SaleFilter, SaleRepository};
pub use stock::{MovementFilter, MovementRecord, StockRepository, StockTotals};
pub use supplier::SupplierRepository;
pub use tenant::{month_start, TenantRepository};
pub use user::{like_pattern, UserFilter, UserRepository};
