//! Authentication core: token issuance, the middleware state machine,
//! password hashing, rate limiting, adaptive challenges and agent
//! authorization.

pub mod agent;
pub mod challenge;
pub mod handlers;
pub mod middleware;
pub mod password;
pub mod rate_limit;
pub mod service;
pub mod tokens;

pub use agent::AgentAuth;
pub use challenge::{Challenge, ChallengeService, EscalationPolicy};
pub use middleware::{AuthFlow, Authenticated, RequireAuth};
pub use password::PasswordHasher;
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use service::AccountService;
pub use tokens::{TokenKind, TokenPair, TokenPayload, TokenService};
