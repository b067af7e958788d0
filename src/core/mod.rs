// Domain-layer modules and shared errors/models
pub mod geo {
    pub use crate::geo::*;
}

pub mod callback_workflow {
    pub use crate::callback_workflow::*;
}

pub mod rating_aggregator {
    pub use crate::rating_aggregator::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod validation {
    pub use crate::validation::*;
}

pub mod errors {
    pub use crate::errors::*;
}
