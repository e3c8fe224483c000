//! Shared types for the EnMS voice pipeline.
//!
//! Data model (intents, time ranges, validation results, clarifications)
//! and the machine whitelist, which is leaf data for both the router and
//! the validator.

pub mod clarify;
pub mod error;
pub mod intent;
pub mod time_range;
pub mod validation;
pub mod whitelist;

pub use clarify::{ClarificationKind, ClarificationRequest, ClarifyOutcome};
pub use error::{VoiceError, VoiceResult};
pub use intent::{Intent, IntentKind, RawEntities, RawIntent, Tier};
pub use time_range::TimeRange;
pub use validation::{RejectionReason, ValidationResult};
pub use whitelist::{ExtractedMachine, MachineMatch, MachineWhitelist, WhitelistHandle};
