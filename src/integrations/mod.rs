//! External service integrations.

pub mod notifier {
    pub use crate::notifier::*;
}
