//! In-memory fakes for unit tests.

#![allow(clippy::unwrap_used, clippy::missing_docs_in_private_items)]

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::upload::{MultipartRequest, Transport, TransportResponse};

/// Clock whose sleeps advance virtual time instantly.
#[derive(Debug)]
pub struct VirtualClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> bool {
        *self.elapsed.lock().unwrap() += duration;
        self.sleeps.lock().unwrap().push(duration);
        true
    }
}

/// When a spawned fake watchdog opens its channel.
#[derive(Debug, Clone, Copy)]
pub enum Readiness {
    /// `delay` after the spawn.
    After(Duration),
    /// Never.
    Never,
}

#[derive(Debug)]
struct FakeState {
    /// Channel appearance times, relative to the clock start.
    channels: HashMap<PathBuf, Duration>,
    /// Exit times of processes; absent pids run forever.
    exits: HashMap<u32, Duration>,
    /// Channel each spawned watchdog opens, and when.
    readiness: Option<(PathBuf, Readiness)>,
    spawns: Vec<(PathBuf, Vec<String>)>,
    terminated: Vec<u32>,
    removed: Vec<PathBuf>,
    fail_spawn: bool,
    fail_terminate: bool,
    fail_queries: bool,
    next_id: u32,
}

/// Scriptable [`Platform`] driven by a [`VirtualClock`].
#[derive(Debug)]
pub struct FakePlatform {
    clock: Arc<VirtualClock>,
    state: Mutex<FakeState>,
}

/// Handle returned by [`FakePlatform::spawn_process`].
#[derive(Debug)]
pub struct FakeProcess {
    pub id: u32,
}

impl FakePlatform {
    pub fn new(clock: Arc<VirtualClock>) -> Self {
        Self {
            clock,
            state: Mutex::new(FakeState {
                channels: HashMap::new(),
                exits: HashMap::new(),
                readiness: None,
                spawns: Vec::new(),
                terminated: Vec::new(),
                removed: Vec::new(),
                fail_spawn: false,
                fail_terminate: false,
                fail_queries: false,
                next_id: 100,
            }),
        }
    }

    pub fn create_channel_at(&self, channel: &Path, at: Duration) {
        self.state
            .lock()
            .unwrap()
            .channels
            .insert(channel.to_owned(), at);
    }

    pub fn exit_process_at(&self, pid: u32, at: Duration) {
        self.state.lock().unwrap().exits.insert(pid, at);
    }

    /// Spawned watchdogs open `channel` according to `readiness`.
    pub fn watchdog_opens(&self, channel: &Path, readiness: Readiness) {
        self.state.lock().unwrap().readiness = Some((channel.to_owned(), readiness));
    }

    pub fn fail_spawns(&self) {
        self.state.lock().unwrap().fail_spawn = true;
    }

    pub fn fail_terminations(&self) {
        self.state.lock().unwrap().fail_terminate = true;
    }

    pub fn fail_process_queries(&self) {
        self.state.lock().unwrap().fail_queries = true;
    }

    pub fn spawns(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.state.lock().unwrap().spawns.clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.state.lock().unwrap().terminated.clone()
    }

    pub fn removed_channels(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().removed.clone()
    }
}

impl Platform for FakePlatform {
    type Process = FakeProcess;

    fn spawn_process(&self, program: &Path, args: &[String]) -> io::Result<FakeProcess> {
        let now = self.clock.elapsed();
        let mut state = self.state.lock().unwrap();
        if state.fail_spawn {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
        }
        state.spawns.push((program.to_owned(), args.to_vec()));
        if let Some((channel, Readiness::After(delay))) = state.readiness.clone() {
            state.channels.insert(channel, now + delay);
        }
        state.next_id += 1;
        Ok(FakeProcess { id: state.next_id })
    }

    fn terminate_process(&self, process: &mut FakeProcess) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_terminate {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "operation not permitted",
            ));
        }
        state.terminated.push(process.id);
        Ok(())
    }

    fn process_running(&self, pid: u32) -> io::Result<bool> {
        let now = self.clock.elapsed();
        let state = self.state.lock().unwrap();
        if state.fail_queries {
            return Err(io::Error::other("query failed"));
        }
        Ok(state.exits.get(&pid).is_none_or(|&at| now < at))
    }

    fn channel_exists(&self, channel: &Path) -> bool {
        let now = self.clock.elapsed();
        self.state
            .lock()
            .unwrap()
            .channels
            .get(channel)
            .is_some_and(|&at| now >= at)
    }

    fn remove_channel(&self, channel: &Path) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.channels.remove(channel);
        state.removed.push(channel.to_owned());
        Ok(())
    }
}

/// [`Transport`] that records requests and returns a canned answer.
#[derive(Debug)]
pub struct RecordingTransport {
    answer: Option<(u16, String)>,
    requests: Mutex<Vec<MultipartRequest>>,
}

impl RecordingTransport {
    pub fn answering(status: u16, body: &str) -> Self {
        Self {
            answer: Some((status, body.to_owned())),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<MultipartRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, request: &MultipartRequest) -> Result<TransportResponse> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.answer {
            Some((status, body)) => Ok(TransportResponse::new(*status, body.clone())),
            None => Err(Error::Transport {
                url: request.url.clone(),
                reason: "connection refused".into(),
            }),
        }
    }
}
