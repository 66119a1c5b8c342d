//! Mock remote service for testing.
//!
//! Serves scripted envelopes keyed by command prefix, records every command
//! in the order workers sent it, and lets tests flip credential validity or
//! hold workers mid-command to build up a queue.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::{RemoteService, RemoteSession};
use crate::envelope::ResultEnvelope;
use crate::error::Result;


#[derive(Default)]
struct MockState {
    /// Scripted replies per command prefix. The last reply of a queue is
    /// sticky and serves every later matching command.
    replies: Vec<(String, VecDeque<ResultEnvelope>)>,
    /// Every command sent, in order.
    commands: Vec<String>,
    credential_invalid: bool,
    paused: bool,
}

#[derive(Default)]
struct MockShared {
    state: Mutex<MockState>,
    resumed: Condvar,
}

/// A cloneable handle; clones share replies and the command log.
#[derive(Clone, Default)]
pub struct MockService {
    shared: Arc<MockShared>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a reply for commands starting with `prefix`.
    pub fn reply(&self, prefix: &str, envelope: ResultEnvelope) {
        let mut state = self.lock();
        match state.replies.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, queue)) => queue.push_back(envelope),
            None => state
                .replies
                .push((prefix.to_string(), VecDeque::from(vec![envelope]))),
        }
    }

    pub fn set_credential_valid(&self, valid: bool) {
        self.lock().credential_invalid = !valid;
    }

    /// Hold every worker inside `send` until `resume`.
    pub fn pause(&self) {
        self.lock().paused = true;
    }

    pub fn resume(&self) {
        self.lock().paused = false;
        self.shared.resumed.notify_all();
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn commands_matching(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn answer(&self, command: &str) -> String {
        let mut state = self.lock();
        state.commands.push(command.to_string());
        while state.paused {
            state = self
                .shared
                .resumed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        let reply = state
            .replies
            .iter_mut()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .and_then(|(_, queue)| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
            .unwrap_or_else(|| ResultEnvelope::failure(format!("mock: no reply for '{}'", command)));
        reply.to_string()
    }
}

impl RemoteService for MockService {
    fn open_session(&self, _worker: &str) -> Result<Box<dyn RemoteSession>> {
        Ok(Box::new(MockSession {
            service: self.clone(),
        }))
    }

    fn credential_valid(&self) -> bool {
        !self.lock().credential_invalid
    }
}


struct MockSession {
    service: MockService,
}

impl RemoteSession for MockSession {
    fn credential_valid(&self) -> bool {
        self.service.credential_valid()
    }

    fn send(&self, command: &str) -> std::result::Result<String, String> {
        Ok(self.service.answer(command))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replies_by_prefix_with_sticky_last() {
        let mock = MockService::new();
        mock.reply("status(", ResultEnvelope::success(json!(1)));
        mock.reply("status(", ResultEnvelope::success(json!(2)));
        let session = mock.open_session("w").unwrap();

        let first = ResultEnvelope::parse(&session.send("status([1])").unwrap());
        let second = ResultEnvelope::parse(&session.send("status([1])").unwrap());
        let third = ResultEnvelope::parse(&session.send("status([1])").unwrap());
        assert_eq!(first.value, Some(json!(1)));
        assert_eq!(second.value, Some(json!(2)));
        assert_eq!(third.value, Some(json!(2)));
        assert_eq!(mock.commands().len(), 3);
    }

    #[test]
    fn unknown_command_fails() {
        let mock = MockService::new();
        let session = mock.open_session("w").unwrap();
        let env = ResultEnvelope::parse(&session.send("peek(3)").unwrap());
        assert!(!env.ok);
        assert!(env.failure_message().contains("no reply"));
    }

    #[test]
    fn credential_toggle_reaches_sessions() {
        let mock = MockService::new();
        let session = mock.open_session("w").unwrap();
        assert!(session.credential_valid());
        mock.set_credential_valid(false);
        assert!(!session.credential_valid());
        assert!(!mock.credential_valid());
    }
}
