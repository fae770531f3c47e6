// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt, sync::Arc};

/// Opaque endpoint identity — a URI-like key, equality by exact value.
///
/// Cheap to clone (backed by `Arc<str>`) since it is threaded through the
/// registry, the scheduler, and every sub-client callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location(Arc<str>);

impl Location {
    pub fn new(uri: impl Into<Arc<str>>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Location {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Location {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
