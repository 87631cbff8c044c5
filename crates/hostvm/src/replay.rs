use serde::{Deserialize, Serialize};

/// Current version of the syscall log format.
pub const EVENT_LOG_VERSION: u32 = 1;

const MAX_SUPPORTED_VERSION: u32 = 1;

/// One host-side observation. Every syscall made by any instance is recorded
/// here, in the order the host served it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LoadScript {
        pid: u64,
        offset: u64,
        code: u64,
    },
    LoadCellData {
        pid: u64,
        source: u64,
        index: u64,
        offset: u64,
        code: u64,
    },
    FindDependency {
        pid: u64,
        code_hash: String,
        hash_type: u8,
        index: Option<u64>,
        code: u64,
    },
    Spawn {
        parent: u64,
        child: Option<u64>,
        argv: Vec<String>,
        inherited: Vec<u64>,
        code: u64,
    },
    Pipe {
        pid: u64,
        fds: Option<[u64; 2]>,
        code: u64,
    },
    Read {
        pid: u64,
        fd: u64,
        requested: u64,
        transferred: u64,
        code: u64,
    },
    Write {
        pid: u64,
        fd: u64,
        requested: u64,
        transferred: u64,
        code: u64,
    },
    Close {
        pid: u64,
        fd: u64,
        code: u64,
    },
    Wait {
        pid: u64,
        target: u64,
        exit_code: Option<i8>,
        code: u64,
    },
    /// A blocked instance handed the thread to a pending one.
    Handoff {
        from: u64,
        to: u64,
    },
    Debug {
        pid: u64,
        message: String,
    },
    Exit {
        pid: u64,
        code: i8,
    },
    Terminated {
        pid: u64,
        exit_code: i8,
        aborted: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    #[serde(default = "default_version")]
    version: u32,
    events: Vec<Event>,
}

fn default_version() -> u32 {
    EVENT_LOG_VERSION
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        EventLog {
            version: EVENT_LOG_VERSION,
            events: Vec::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn record(&mut self, event: Event) {
        tracing::trace!(?event, "host event");
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Operator-channel output of one instance, in order.
    pub fn debug_messages(&self, pid: u64) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Debug { pid: p, message } if *p == pid => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| e.to_string())
    }

    /// Rejects logs written by a newer format version.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let log: EventLog = serde_json::from_str(json).map_err(|e| e.to_string())?;
        if log.version > MAX_SUPPORTED_VERSION {
            return Err(format!(
                "unsupported EventLog version {}: max supported is {}",
                log.version, MAX_SUPPORTED_VERSION
            ));
        }
        Ok(log)
    }

    /// Index of the first event where two runs differ, if any.
    pub fn divergence(&self, other: &EventLog) -> Option<usize> {
        let common = self.events.len().min(other.events.len());
        (0..common)
            .find(|&i| self.events[i] != other.events[i])
            .or(if self.events.len() != other.events.len() { Some(common) } else { None })
    }
}
