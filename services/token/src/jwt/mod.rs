//! JWT claims, compact JWS encoding and claim validation.

pub mod claims;
pub mod serializer;
pub mod validator;

pub use claims::{Audience, Claims, TokenType, IS_ADMIN_CLAIM, REFRESH_TOKEN_CLAIM, TOKEN_TYPE_CLAIM};
pub use serializer::{JwsHeader, JwtSerializer};
pub use validator::{TokenValidationError, Validation, CLOCK_SKEW_SECONDS};
