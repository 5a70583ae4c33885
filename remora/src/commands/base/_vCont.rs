/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::BytesMut;

use crate::commands::*;

#[derive(PartialEq, Debug)]
pub enum vCont {
    Query,
    Actions(Vec<(ResumeAction, ThreadId)>),
}

impl ParseCommand for vCont {
    fn parse(mut bytes: BytesMut) -> Option<Self> {
        if bytes == b"?"[..] {
            Some(vCont::Query)
        } else if !bytes.starts_with(b";") {
            None
        } else {
            let mut bytes = bytes.split_off(1);
            // example packet: $vCont;s:p3e86d3.3e86d3;c:p3e86d3.-1#3b
            // with prefix (`$vCont`) and checksum stripped. An action
            // without a thread applies to every thread.
            let mut actions = Vec::new();
            for act in bytes.split_mut(|c| *c == b';') {
                let mut iter = act.splitn(2, |c| *c == b':');
                let action = iter.next()?;
                let thread_id = match iter.next() {
                    Some(tid) => ThreadId::decode(tid)?,
                    None => ThreadId::all(),
                };
                let action = match action.split_first() {
                    Some((b'c', [])) => ResumeAction::Continue(None),
                    Some((b'C', sig)) => ResumeAction::Continue(Some(decode_signal(sig)?)),
                    Some((b's', [])) => ResumeAction::Step(None),
                    Some((b'S', sig)) => ResumeAction::Step(Some(decode_signal(sig)?)),
                    Some((b't', [])) => ResumeAction::Stop,
                    Some((b'r', range)) => {
                        let mut iter = range.split(|c| *c == b',');
                        let start: u64 = iter.next().and_then(|x| decode_hex(x).ok())?;
                        let end: u64 = iter.next().and_then(|x| decode_hex(x).ok())?;
                        ResumeAction::StepUntil(start, end)
                    }
                    _ => return None,
                };
                actions.push((action, thread_id));
            }
            if actions.is_empty() {
                None
            } else {
                Some(vCont::Actions(actions))
            }
        }
    }
}
