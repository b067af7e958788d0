// Thin namespace wrapper for API-layer components
pub mod handlers {
    pub use crate::handlers::*;
}

pub mod callback_handler {
    pub use crate::callback_handler::*;
}

pub mod rating_handler {
    pub use crate::rating_handler::*;
}

pub mod routes {
    pub use crate::routes::*;
}

pub mod caller {
    pub use crate::caller::*;
}
