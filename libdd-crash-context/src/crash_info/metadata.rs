// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::common::tag::Tag;
use serde::{Deserialize, Serialize};

/// Identifies the reporting library and session in every crash report.
///
/// `library_name` and `family` are fixed for a given build of the embedding
/// library; everything session-specific (service, env, runtime identity, …)
/// travels in `tags`.  The instance published when the tracker is armed is
/// authoritative until the next arm: it is serialized once, up front, so the
/// signal handler never touches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub library_name: String,
    pub library_version: String,
    pub family: String,
    /// A list of "key:value" tuples.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl Metadata {
    pub fn new(
        library_name: String,
        library_version: String,
        family: String,
        tags: Vec<Tag>,
    ) -> Self {
        Self {
            library_name,
            library_version,
            family,
            tags,
        }
    }
}
