// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod metadata;
mod sig_info;

pub use metadata::Metadata;
pub(crate) use sig_info::signal_has_fault_address;
pub use sig_info::SignalNames;
