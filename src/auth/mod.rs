pub mod context;
pub mod evaluator;
pub mod membership;
pub mod password;
pub mod roles;
pub mod token;

pub use context::{ContextError, Principal, ScopeContext};
pub use evaluator::{AccessError, AccessEvaluator, LoginOutcome};
pub use membership::MembershipOracle;
pub use password::{Argon2Verifier, PasswordError, PasswordVerifier};
pub use roles::RoleResolver;
pub use token::{Claims, SigningAlgorithm, TokenCodec, TokenError, TokenPair};
