//! Interlock reservation engine.
//!
//! This crate provides:
//! - The train catalog with per-run seat inventory and passby index
//! - Ticket and transfer search
//! - The order ledger with FIFO pending promotion on refund
//! - User accounts and the in-memory session layer
//! - The line-oriented command dispatcher behind the `interlock` binary

pub mod catalog;
pub mod dispatch;
pub mod engine;
pub mod orders;
pub mod search;
pub mod session;
pub mod users;

pub use catalog::{Passby, SeatInfo, TrainCatalog, TrainInfo, TrainSchedule};
pub use dispatch::{Dispatcher, Reply};
pub use engine::{BuyOutcome, Engine};
pub use orders::{Order, OrderLedger, OrderStatus, PendingOrder};
pub use search::{Ticket, Transfer};
pub use session::Session;
pub use users::{ProfileView, UserDirectory, UserInfo};
