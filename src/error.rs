use crate::store::StoreError;
use techblog_core::ImageFormat;
use thiserror::Error;

/// Problems the author can fix. The `Display` text is shown to them verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Upload a valid image. The file you uploaded was either not an image or a corrupted image.")]
    NotAnImage,
    #[error("{format} images are not accepted. Allowed formats: {allowed}.")]
    UnsupportedFormat { format: ImageFormat, allowed: String },
    #[error("The image is {size} bytes, larger than the {max} byte limit.")]
    OversizedBytes { size: u64, max: u64 },
    #[error("The image is {width}x{height} pixels, more than the {max} pixel limit.")]
    OversizedPixels { width: u32, height: u32, max: u64 },
    #[error("The {0} field is required.")]
    MissingRequiredField(&'static str),
    #[error("The {field} field may be at most {max} characters long.")]
    FieldTooLong { field: &'static str, max: usize },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("could not store a unique slug after {attempts} attempts")]
    Conflict { attempts: u32 },
    #[error("article {0} does not exist")]
    NotFound(i64),
    #[error("category `{0}` is still used by articles")]
    Protected(String),
    #[error("storage failure")]
    Internal(#[source] StoreError),
}

impl PublishError {
    /// Message suitable for the person who submitted the request.
    pub fn user_message(&self) -> String {
        match self {
            PublishError::Validation(why) => why.to_string(),
            PublishError::Internal(_) => "Something went wrong. Please try again later.".into(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for PublishError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Protected(name) => PublishError::Protected(name),
            StoreError::Missing(id) => PublishError::NotFound(id),
            other => PublishError::Internal(other),
        }
    }
}
