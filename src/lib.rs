//! IAM Sync Library
//!
//! Exports the IAM entities of one AWS account into portable JSON files,
//! rewrites account ids for the other account of a production/development
//! pair, and converges an account onto those files.

pub mod aws;
pub mod config;
pub mod confirm;
pub mod error;
pub mod extract;
pub mod filter;
pub mod provider;
pub mod reconcile;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod translate;
pub mod types;

#[cfg(test)]
mod fake;

pub use aws::AwsIamApi;
pub use config::{AwsCredentials, ReconcileStrategies, ReconcileStrategy, SyncConfig};
pub use error::{IamSyncError, Result};
pub use extract::Extractor;
pub use provider::{ApiError, IamApi};
pub use reconcile::{delete_all_policies, Reconciler};
pub use session::IamSession;
pub use snapshot::{capture, AccountSnapshot};
pub use store::StateStore;
pub use translate::{AccountPair, AccountTranslator};
pub use types::{EntityKind, SyncAction, SyncResult};
