//! Application identities: registration, activation and local credentials

mod manager;
mod model;

pub use manager::ApplicationCredentialManager;
pub use model::{
    ApplicationConfig, ApplicationListing, ApplicationToken, ApplicationView, ConnectionRef,
    CredentialCheck, DeletionReport, MASKED_SECRET, Registration, StepOutcome,
};
