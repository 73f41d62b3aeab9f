mod device;
mod store;

pub use device::{detect_device, DeviceClass};
pub use store::{
    Account, AccountUpdate, Admission, AuthOutcome, DeviceSession, NewAccount, SessionError,
    SessionResult, SqliteSessionStore, SqliteSessionStoreBuilder,
};

use sha2::{Digest, Sha256};

/// Device fingerprint: a fixed-length digest over the raw client
/// identifier and the origin address. Same client on the same network
/// path maps to the same session; a changed address means a new device.
pub fn fingerprint(user_agent: &str, remote_addr: &str) -> String {
    let digest = Sha256::digest(format!("{user_agent}:{remote_addr}").as_bytes());
    hex::encode(digest)[..32].to_string()
}
