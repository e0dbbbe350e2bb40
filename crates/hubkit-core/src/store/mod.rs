// Entity storage: identity caches, property bags, and the refresh engine.

pub(crate) mod cache;
pub(crate) mod properties;
pub(crate) mod refresh;

pub use properties::PropertyValue;
