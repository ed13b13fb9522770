// SPDX-License-Identifier: BUSL-1.1
//! HTTP middleware.

pub mod metrics;
