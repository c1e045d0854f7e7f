pub mod correction;
pub mod entry_bill;
pub mod intake;
pub mod reconciler;

pub use correction::{CorrectionEvent, CorrectionFlow, CorrectionState};
pub use entry_bill::{EntryBillService, ScanOutcome, SessionView};
pub use intake::{ItemAccumulator, ScanBuffer, StockIndex};
pub use reconciler::reconcile;
