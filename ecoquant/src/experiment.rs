// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

pub(crate) mod comparator;
pub(crate) mod executor;
pub(crate) mod record;

pub(crate) use comparator::*;
pub(crate) use executor::*;
pub(crate) use record::*;
