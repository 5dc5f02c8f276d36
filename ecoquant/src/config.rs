// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

pub(crate) mod service_config;
pub(crate) mod tracker_config;

pub(crate) use service_config::*;
pub(crate) use tracker_config::*;
