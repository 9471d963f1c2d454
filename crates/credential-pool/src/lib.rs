//! Credential pool for a rate-limited completions API
//!
//! Holds an ordered list of API credentials and one health record per
//! credential. Selection is round-robin over usable credentials; health is
//! updated from dispatch outcomes.
//!
//! Credential lifecycle:
//! 1. Pool is built from the configured keys → every credential `active`
//! 2. `current()` hands out the credential at the shared cursor, scanning forward
//!    past unusable ones
//! 3. Global rate limit → inactive until the reset time (default 24h)
//! 4. Three consecutive errors → inactive for the error cooldown (default 30m)
//! 5. Reset time passes → reactivated on the next selection scan
//! 6. Admin reset → back to the initial state immediately

pub mod clock;
pub mod error;
pub mod pool;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use pool::{
    CredentialHealth, CredentialPool, CredentialStatus, PoolPolicy, PoolSnapshot, Rotation,
    SelectedCredential,
};
pub use telemetry::spawn_gauge_task;
