//! HTTP/1.x message model: ordered/case-preserving headers, request and
//! response parsing and serialization, and the Content-Encoding decode/encode
//! chain used when recording and replaying a TestCase.

pub mod encoding;
pub mod message;

pub use encoding::{
    EncodingError, content_encoding_tokens, decode_body, encode_body, tokenize_content_encoding,
};
pub use message::{
    HeaderMap, HeaderValue, HttpRequest, HttpResponse, MessageError, detect_request,
    detect_response, get_ci, parse_request, parse_response, serialize_request, serialize_response,
    try_parse_request, try_parse_response,
};
