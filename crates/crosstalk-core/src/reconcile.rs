// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identifier reconciliation: expands a raw thread identifier into the set
//! of equivalent identifiers that may denote the same logical conversation.
//!
//! Upstream writers are inconsistent about identifier shape: the same loan
//! query may be written as `HPR85`, `QRY-85`, or a bare `85` depending on
//! which team's form produced it. This module recovers the equivalence with
//! an allow-list of narrow, reversible patterns rather than a general regex,
//! to bound collision risk.
//!
//! Numeric cores shorter than two digits are rejected everywhere. Short
//! suffixes collide too often and were the dominant source of observed
//! cross-thread contamination; dropping them trades some recall for
//! precision.
//!
//! The pure pass is closed under itself: resolving every member of
//! `resolve(i)` yields nothing beyond `resolve(i)`. Registry-backed
//! augmentation (see the store crate) does not share that property, because
//! threads created between calls can extend the result.

use std::collections::BTreeSet;

/// Minimum digit count for a numeric core to be accepted.
pub const MIN_NUMERIC_LEN: usize = 2;

/// Prefixes a bare numeric identifier may appear decorated with upstream.
///
/// Each prefix is synthesized both fused (`HPR85`) and separated (`HPR-85`).
/// Extending this list widens recall for every identifier in the system, so
/// additions need evidence from real upstream data.
pub const DECORATED_PREFIXES: &[&str] = &["HPR", "QRY"];

/// Separators a trailing numeric suffix may follow.
const SUFFIX_SEPARATORS: &[char] = &['-', '_', '/', ':'];

/// Expands a raw identifier into its set of equivalent identifiers.
///
/// The trimmed original is always included. A blank input yields the empty
/// set, which callers surface as `IdentifierUnresolved`.
pub fn resolve(raw: &str) -> BTreeSet<String> {
	let trimmed = raw.trim();
	let mut out = BTreeSet::new();
	if trimmed.is_empty() {
		return out;
	}
	out.insert(trimmed.to_string());

	let mut cores = BTreeSet::new();
	if let Some(core) = alpha_prefix_suffix(trimmed) {
		cores.insert(core);
	}
	if let Some(core) = suffix_after_separator(trimmed) {
		cores.insert(core);
	}
	if is_numeric_core(trimmed) {
		cores.insert(trimmed.to_string());
	}
	for token in trimmed.split_whitespace() {
		if is_numeric_core(token) {
			cores.insert(token.to_string());
		}
	}

	// Every extracted core also contributes the decorated forms it might
	// appear as upstream. Generating them for all cores (not only purely
	// numeric inputs) is what keeps the pass closed under itself.
	for core in cores {
		for prefix in DECORATED_PREFIXES {
			out.insert(format!("{prefix}{core}"));
			out.insert(format!("{prefix}-{core}"));
		}
		out.insert(core);
	}

	out
}

/// Resolves every identifier in a set and unions the results.
pub fn resolve_set(ids: &BTreeSet<String>) -> BTreeSet<String> {
	ids.iter().flat_map(|id| resolve(id)).collect()
}

/// True if the whole string is an acceptable numeric core.
fn is_numeric_core(s: &str) -> bool {
	s.len() >= MIN_NUMERIC_LEN && s.chars().all(|c| c.is_ascii_digit())
}

/// Extracts the numeric suffix of an alphabetic-prefix + numeric-suffix
/// identifier (`HPR85` -> `85`).
fn alpha_prefix_suffix(s: &str) -> Option<String> {
	let split = s.find(|c: char| c.is_ascii_digit())?;
	let (prefix, suffix) = s.split_at(split);
	if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
		return None;
	}
	is_numeric_core(suffix).then(|| suffix.to_string())
}

/// Extracts a trailing numeric suffix after the last separator
/// (`QRY-85` -> `85`, `loan_85` -> `85`).
fn suffix_after_separator(s: &str) -> Option<String> {
	let split = s.rfind(|c: char| SUFFIX_SEPARATORS.contains(&c))?;
	let suffix = &s[split + 1..];
	is_numeric_core(suffix).then(|| suffix.to_string())
}
