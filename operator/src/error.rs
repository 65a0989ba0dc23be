use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes API error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("finalizer error: {0}")]
    Finalizer(Box<kube::runtime::finalizer::Error<Error>>),

    #[error("invalid input: {0}")]
    UserInput(String),

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("template rendering failed: {0}")]
    Render(String),

    #[error("readiness probe failed: {0}")]
    Readiness(String),
}

pub fn instance_name(store: &store_types::Store) -> Result<&str, Error> {
    store
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::UserInput("Store is missing metadata.name".to_string()))
}
