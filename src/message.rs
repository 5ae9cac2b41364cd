pub mod error;
pub mod request;
pub mod response;

pub use error::RelayError;
pub use error::RelayErrorCode;
pub use request::RequestMessage;
pub use request::RequestMessageBuilder;
pub use response::ResponseMessage;
pub use response::ResponseMessageBuilder;

/// Decode the return value of a successful response into `T`.
pub fn decode_response_data<T>(response: ResponseMessage) -> Result<T, RelayError>
where
    T: for<'b> minicbor::Decode<'b>,
{
    let data = response.data?;
    if data.is_empty() {
        return Err(RelayError::unexpected_empty_response());
    }
    minicbor::decode(&data).map_err(|e| RelayError::deserialization_error(e.to_string()))
}
