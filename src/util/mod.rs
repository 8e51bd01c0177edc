//! Utility functions shared by the pipeline and the CLI.
//!
//! - **URL validation**: SSRF guards for feed URLs, article links, and the
//!   retrieval proxy
//! - **Text processing**: markup stripping, control-character removal, and
//!   width-aware truncation for terminal output

mod text;
mod url_validator;

pub use text::{clamp_chars, display_width, strip_control_chars, strip_markup, truncate_to_width};
pub use url_validator::{normalize_link, validate_proxy_base, validate_url, UrlValidationError};
