//! Authentication module for Findawise

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtManager};
pub use middleware::{
    optional_auth, require_auth, AuthError, AuthState, AuthUser, OptionalAuthUser,
};
