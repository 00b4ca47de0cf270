//! Local persistence collaborators: secrets, session state and chat history.

pub mod chat_store;
pub mod json_file;
pub mod secret;
pub mod session;

pub use chat_store::{ChatStore, ChatStoreError, InMemoryChatStore, JsonFileChatStore};
pub use json_file::JsonFileError;
#[cfg(feature = "os-keyring")]
pub use secret::OsKeyringSecretStore;
pub use secret::{InMemorySecretStore, SecretStore, SecretStoreError};
pub use session::{PersistentSessionStore, SessionProfile, SessionStore, SessionStoreError};
