/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

mod _QNonStop;
mod _QStartNoAckMode;
mod _QThreadEvents;
mod _QuestionMark;
mod _c;
mod _d_upper;
mod _g;
mod _g_upper;
mod _h_upper;
mod _k;
mod _m;
mod _m_upper;
mod _p;
mod _p_upper;
mod _qAttached;
mod _qC;
mod _qSupported;
mod _qSymbol;
mod _qXfer;
mod _qfThreadInfo;
mod _qsThreadInfo;
mod _s;
mod _t_upper;
mod _vCont;
mod _vKill;
mod _vStopped;
mod _x_upper;
mod _z;
mod _z_upper;

pub use _QNonStop::*;
pub use _QStartNoAckMode::*;
pub use _QThreadEvents::*;
pub use _QuestionMark::*;
pub use _c::*;
pub use _d_upper::*;
pub use _g::*;
pub use _g_upper::*;
pub use _h_upper::*;
pub use _k::*;
pub use _m::*;
pub use _m_upper::*;
pub use _p::*;
pub use _p_upper::*;
pub use _qAttached::*;
pub use _qC::*;
pub use _qSupported::*;
pub use _qSymbol::*;
pub use _qXfer::*;
pub use _qfThreadInfo::*;
pub use _qsThreadInfo::*;
pub use _s::*;
pub use _t_upper::*;
pub use _vCont::*;
pub use _vKill::*;
pub use _vStopped::*;
pub use _x_upper::*;
pub use _z::*;
pub use _z_upper::*;

/// The `:0`/`:1` argument of the `Q` packets switching a mode off or on.
fn parse_switch(bytes: &[u8]) -> Option<bool> {
    match bytes {
        b":0" => Some(false),
        b":1" => Some(true),
        _ => None,
    }
}
