//! Device-flow login against the marketplace and persistence of the
//! resulting token.

pub mod authenticator;
pub mod device_flow;
pub mod device_id;
pub mod storage;
pub mod types;

pub use {
    authenticator::{Authenticator, DevicePrompt, RELOGIN_HINT, SilentPrompt},
    device_flow::{DeviceCodeResponse, TokenGrant},
    device_id::DeviceFingerprint,
    storage::{
        CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
    },
    types::{Token, UserInfo, serialize_option_secret, serialize_secret},
};
