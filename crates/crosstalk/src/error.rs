// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the Crosstalk client SDK.

use thiserror::Error;

/// Errors that can occur when using the Crosstalk client.
#[derive(Debug, Error)]
pub enum ClientError {
	/// Invalid client configuration.
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	/// Failed to connect to the server.
	#[error("connection failed: {0}")]
	ConnectionFailed(#[from] reqwest::Error),

	/// Server returned an error response.
	#[error("server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	/// The push stream failed mid-connection.
	#[error("stream error: {0}")]
	StreamError(String),

	/// Failed to parse a server payload.
	#[error("parse failed: {0}")]
	ParseFailed(#[from] serde_json::Error),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
