// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#[macro_use]
pub mod error;
pub mod parameters;

pub use error::Error;
