// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod id;

pub use id::{ConnectionId, StatelessResetToken};
