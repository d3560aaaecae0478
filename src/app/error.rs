// Copyright 2022 Chris Gubbin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! # Error
//! The error type for the binary

use miette::Diagnostic;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug, Diagnostic)]
pub(crate) enum ApplicationError {
    #[error(transparent)]
    #[diagnostic(code(carrier_dmd::io_error))]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    #[diagnostic(code(carrier_dmd::config_error))]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Dmd(#[from] crate::error::DmdError),
    #[error(transparent)]
    Storage(#[from] crate::error::IOError),
    #[error("no checkpoint found in {0}")]
    NoCheckpoint(PathBuf),
    #[error("failed to initialise the logger: {0}")]
    Logger(#[from] log::SetLoggerError),
    #[error("failed to set the global subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}
