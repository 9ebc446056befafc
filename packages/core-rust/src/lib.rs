//! Ambit Core: request-scoped ambient context and authorization resolution.

pub mod authz;
pub mod context;
pub mod error;
pub mod requirement;
pub mod store;
pub mod traits;
pub mod types;

pub use authz::{evaluate, merge, parse_bearer, Authorizer, Decision, EffectiveRequirements};
pub use context::{ContextKey, ContextRecord};
pub use error::{AuthzError, ForbiddenReason, ProviderError, RequirementError};
pub use requirement::{
    AuthorizationRequirement, ClaimDeclaration, ClaimRequirement, OperationRequirements,
    Requirements,
};
pub use store::RequestContext;
pub use traits::AuthProvider;
pub use types::{Claim, Principal};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
