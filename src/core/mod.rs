// Domain-layer modules and shared errors/models
pub mod ingestion {
    pub use crate::ingestion::*;
}

pub mod enrichment {
    pub use crate::enrichment::*;
}

pub mod filters {
    pub use crate::filters::*;
}

pub mod analytics {
    pub use crate::analytics::*;
}

pub mod export {
    pub use crate::export::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
