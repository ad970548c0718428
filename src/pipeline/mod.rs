// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod dispatcher;

pub use dispatcher::{OutputSink, Pipeline, spawn_pipeline};
