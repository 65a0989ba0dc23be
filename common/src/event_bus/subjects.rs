use std::fmt::Display;

/// Subject a single store's activity is published under.
pub fn store<T>(name: T) -> String
where
    T: Display,
{
    format!("store.events.{}", name)
}

/// Wildcard subject covering every store, used by the durable stream's
/// subject filter.
pub const ALL: &str = "store.events.*";
