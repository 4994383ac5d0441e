pub mod bootstrap;
pub mod codec;
pub mod error;
pub mod observability;
pub mod persist;
pub mod record;
pub mod registry;
pub mod simulator;
pub mod storage;
pub mod vault;

pub use bootstrap::{ApplyReport, BootstrapApplier, ARGS_SEPARATOR};
pub use codec::{Document, DocumentV1, DocumentV2, ParseError};
pub use error::{PersistError, Result};
pub use persist::{Collaborators, LoadStats, PersistConfig, PersistedVariables};
pub use record::{Partition, PartitionTag, Provenance, Record, RecordStore, VariableClass};
pub use registry::{
    ApplyError, InMemoryRegistry, PersistAction, PrivilegeChecker, Session, VariableInfo,
    VariableRegistry,
};
pub use storage::{DurableFile, FileStore, InMemoryFileStore, LocalFileStore, StorageError};
pub use vault::{CryptoError, InMemoryKeyring, Keyring};
