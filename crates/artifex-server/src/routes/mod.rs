// SPDX-License-Identifier: BUSL-1.1
//! HTTP routes. Each module exposes `router() -> Router<AppState>`.

pub mod artifacts;
pub mod queue;
