// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A distributed exchange client: a consumer-side component of a massively
//! parallel query engine that concurrently pulls serialized data pages from
//! many remote producer endpoints over HTTP, buffers them in memory subject
//! to a global byte budget, and hands them in arrival order to a downstream
//! single-consumer operator.

pub mod cfg;
pub mod client;
pub mod models;
