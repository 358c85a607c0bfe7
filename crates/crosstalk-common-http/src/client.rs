// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP client with consistent User-Agent header.

use reqwest::{Client, ClientBuilder};

/// Creates a new HTTP client with the standard Crosstalk User-Agent header.
pub fn new_client() -> Client {
	builder().build().expect("failed to build HTTP client")
}

/// Creates a new HTTP client builder with the standard Crosstalk User-Agent
/// header.
///
/// Use this when you need to customize the client (e.g., set timeout).
///
/// # Example
/// ```ignore
/// let client = crosstalk_common_http::builder()
///     .timeout(Duration::from_secs(30))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// Returns the standard Crosstalk User-Agent string.
///
/// Format: `crosstalk/{version}`
pub fn user_agent() -> String {
	format!("crosstalk/{}", env!("CARGO_PKG_VERSION"))
}
