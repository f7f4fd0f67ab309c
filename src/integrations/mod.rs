//! External service integrations.

pub mod services {
    pub use crate::services::*;
}

pub mod circuit_breaker {
    pub use crate::circuit_breaker::*;
}

pub mod object_store {
    pub use crate::object_store::*;
}
