// Thin namespace wrapper for API-layer components
pub mod app {
    pub use crate::app::*;
}

pub mod handlers {
    pub use crate::handlers::*;
}

pub mod business_handler {
    pub use crate::business_handler::*;
}

pub mod survey_handler {
    pub use crate::survey_handler::*;
}

pub mod audio_handler {
    pub use crate::audio_handler::*;
}

pub mod openapi {
    pub use crate::openapi::*;
}
