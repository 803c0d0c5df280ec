//! Request handling: binding and validation, the generic pipeline, response
//! writers and the error boundary around them.

pub mod boundary;
pub mod error_layer;
pub mod pipeline;
pub mod response;
pub mod validation;

pub use boundary::{error_response, panic_response};
pub use error_layer::error_mapping_middleware;
pub use pipeline::{bind_and_validate, Endpoint, NoPayload};
pub use response::{FileWriter, JsonWriter, NoContentWriter, ResponseWriter};
pub use validation::{
    bind_error, validate_payload, CustomValidationErrors, Validatable, ValidationFailure,
};
