/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io;

use thiserror::Error;

use crate::breakpoint::BreakpointError;
use crate::commands::CommandParseError;
use crate::hex::GdbHexError;
use crate::inferiors::InferiorError;
use crate::packet::PacketParseError;
use crate::regcache::RegCacheError;
use crate::target::TargetError;

#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[error("Failed waiting for gdb client to connect")]
    WaitForGdbConnect {
        #[source]
        source: io::Error,
    },
    #[error("Connection reset")]
    ConnReset,
    #[error(transparent)]
    PacketError(PacketParseError),
    #[error(transparent)]
    CommandError(CommandParseError),
    #[error("No inferior attached")]
    Detached,
    #[error("No thread to resume")]
    NothingToResume,
    #[error(transparent)]
    TargetError(TargetError),
    #[error(transparent)]
    InferiorError(InferiorError),
    #[error(transparent)]
    BreakpointError(BreakpointError),
    #[error(transparent)]
    RegCacheError(RegCacheError),
    #[error("gdbserver failed to receive stop event")]
    GdbServerStopEventRecvError,
}

impl Error {
    /// The back-end failure behind this error, if any. It decides the
    /// error reply sent to the debugger.
    pub fn target_error(&self) -> Option<TargetError> {
        match self {
            Error::TargetError(err) => Some(*err),
            Error::InferiorError(InferiorError::Target(err)) => Some(*err),
            Error::BreakpointError(BreakpointError::Target(err)) => Some(*err),
            Error::BreakpointError(BreakpointError::Unsupported(_)) => {
                Some(TargetError::Unsupported)
            }
            _ => None,
        }
    }
}

impl From<PacketParseError> for Error {
    fn from(err: PacketParseError) -> Self {
        Error::PacketError(err)
    }
}

impl From<CommandParseError> for Error {
    fn from(err: CommandParseError) -> Self {
        Error::CommandError(err)
    }
}

impl From<GdbHexError> for Error {
    fn from(err: GdbHexError) -> Self {
        Error::PacketError(err.into())
    }
}

impl From<TargetError> for Error {
    fn from(err: TargetError) -> Self {
        Error::TargetError(err)
    }
}

impl From<InferiorError> for Error {
    fn from(err: InferiorError) -> Self {
        Error::InferiorError(err)
    }
}

impl From<BreakpointError> for Error {
    fn from(err: BreakpointError) -> Self {
        Error::BreakpointError(err)
    }
}

impl From<RegCacheError> for Error {
    fn from(err: RegCacheError) -> Self {
        Error::RegCacheError(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::target::PointKind;
    use nix::errno::Errno;

    #[test]
    fn target_errors_survive_wrapping() {
        let err: Error = InferiorError::Target(TargetError::Errno(Errno::EIO)).into();
        assert_eq!(err.target_error(), Some(TargetError::Errno(Errno::EIO)));
        let err: Error = BreakpointError::Unsupported(PointKind::ReadWatch).into();
        assert_eq!(err.target_error(), Some(TargetError::Unsupported));
        let err: Error = BreakpointError::NotFound.into();
        assert_eq!(err.target_error(), None);
        assert_eq!(Error::ConnReset.target_error(), None);
    }
}
