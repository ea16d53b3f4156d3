use eventhub_domain::error::DispatchError;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("dispatch: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("validation: {0}")]
    Validation(String),
}
