//! Credential rotation and model fallback dispatcher
//!
//! Drives one completion request across an ordered list of models and a
//! shared credential pool:
//! 1. Models are tried in configured order (primary, then backups)
//! 2. Each model gets a fixed attempt budget
//! 3. Global rate limit → disable the credential, rotate, same model
//! 4. Model rate limit → next model, credential untouched
//! 5. Other failures → record error, fixed delay, retry; rotate on the last attempt
//! 6. Success → record success, extract content and images, return
//!
//! Exhaustion is returned as a structured `DispatchResult`, never an error.

pub mod classify;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod models;

pub use classify::{FailureClass, RateLimitClassifier, SubstringClassifier};
pub use dispatch::{DispatchOutcome, DispatchPolicy, DispatchResult, Dispatcher};
pub use error::{Error, Result};
pub use extract::{ImageSource, extract_content, extract_images};
pub use models::{ModelCandidate, ModelCandidates};
