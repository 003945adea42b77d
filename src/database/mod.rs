pub mod manager;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod transaction;

pub use manager::{DatabaseError, DatabaseManager};
pub use store::{MembershipStore, PrincipalStore, RoleAssignmentStore, StorageError};
pub use transaction::{BoundTx, TxOutcome, TxPhase, TxProvider, TxSession};
