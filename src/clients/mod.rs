//! External collaborators consumed by the settlement core

pub mod oracle;
pub mod policy_store;
pub mod rpc;
pub mod signer;

pub use oracle::{HttpOracleFeed, OracleEndpoints, OracleFeed, OracleFetch, ProviderFailure};
pub use policy_store::{InMemoryPolicyStore, PolicyRecord, PolicyStore};
pub use rpc::{HttpRpcClient, RpcClient, SendOptions, SubmissionHandle, SubmissionStatus};
pub use signer::{KeyProvider, LocalSigner};
