// SPDX-License-Identifier: Apache-2.0

pub mod args;
mod parse;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
