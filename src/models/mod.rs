pub mod bill;
pub mod inventory;
pub mod recon;
pub mod result;

pub use bill::{ExitBill, ExitBillItem, ExitBillSummary};
pub use inventory::StockVariant;
pub use recon::{Discrepancies, ReconLine, ReconStats};
pub use result::{
    CorrectionItem, CorrectionPayload, DiscrepancyRow, EntryBill, EntryBillItemRecord, ItemKind,
};
