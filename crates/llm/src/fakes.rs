//! In-process [`GenerativeModel`] doubles for tests and dry runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::{GenerationRequest, GenerativeModel};

/// Replays canned replies in order and records every request.  Once the
/// script runs out the last reply repeats.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn complete(&self, request: &GenerationRequest) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        let mut last = self
            .last
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted model poisoned"))?;
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                Ok(reply)
            }
            None => match last.as_ref() {
                Some(reply) => Ok(reply.clone()),
                None => bail!("scripted model has no replies"),
            },
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Always fails as if the transport were down.
pub struct UnreachableModel;

#[async_trait]
impl GenerativeModel for UnreachableModel {
    async fn complete(&self, _request: &GenerationRequest) -> Result<String> {
        bail!("generative model unreachable")
    }

    fn describe(&self) -> String {
        "unreachable".to_string()
    }
}
