// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod ranges;

pub use ranges::Ranges;
