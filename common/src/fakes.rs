//! In-memory stand-ins for the device capabilities, shared by the unit tests.

use std::collections::HashMap;

use crate::{
    association::Association,
    error::{FlashError, TransportError},
    flash::{FlashSession, FlashWriter},
    liveness::{IndicatorPin, PinError},
    orchestrator::Restart,
    transport::{HttpConnection, ResponseHead},
};

#[derive(Debug, Clone)]
pub struct FakeReply {
    head: ResponseHead,
    body: Vec<u8>,
    fail_read_after: Option<usize>,
}

impl FakeReply {
    pub fn body(body: &[u8]) -> Self {
        Self {
            head: ResponseHead {
                status: 200,
                content_length: Some(body.len() as u64),
                location: None,
            },
            body: body.to_vec(),
            fail_read_after: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            head: ResponseHead {
                status,
                content_length: Some(0),
                location: None,
            },
            body: Vec::new(),
            fail_read_after: None,
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self {
            head: ResponseHead {
                status,
                content_length: Some(0),
                location: Some(location.to_string()),
            },
            body: Vec::new(),
            fail_read_after: None,
        }
    }

    pub fn content_length(mut self, length: Option<u64>) -> Self {
        self.head.content_length = length;
        self
    }

    pub fn fail_read_after(mut self, bytes: usize) -> Self {
        self.fail_read_after = Some(bytes);
        self
    }
}

/// Routes URLs to canned replies; unknown URLs fail as unreachable hosts.
#[derive(Debug, Default)]
pub struct FakeHttp {
    routes: HashMap<String, FakeReply>,
    active: Option<(FakeReply, usize)>,
    requests: Vec<String>,
    releases: usize,
    max_read: usize,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self {
            max_read: 300,
            ..Default::default()
        }
    }

    pub fn route(mut self, url: &str, reply: FakeReply) -> Self {
        self.routes.insert(url.to_string(), reply);
        self
    }

    pub fn requests(&self) -> Vec<&str> {
        self.requests.iter().map(String::as_str).collect()
    }

    pub fn releases(&self) -> usize {
        self.releases
    }
}

impl HttpConnection for FakeHttp {
    fn get(&mut self, url: &str) -> Result<ResponseHead, TransportError> {
        assert!(self.active.is_none(), "previous response was not released");
        self.requests.push(url.to_string());
        let reply = self
            .routes
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError::request(url, "host unreachable"))?;
        let head = reply.head.clone();
        self.active = Some((reply, 0));
        Ok(head)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let (reply, offset) = self
            .active
            .as_mut()
            .ok_or_else(|| TransportError::Read("no active response".into()))?;

        if let Some(limit) = reply.fail_read_after {
            if *offset >= limit {
                return Err(TransportError::Read("connection reset".into()));
            }
        }

        let remaining = &reply.body[*offset..];
        let n = remaining.len().min(buf.len()).min(self.max_read);
        buf[..n].copy_from_slice(&remaining[..n]);
        *offset += n;
        Ok(n)
    }

    fn release(&mut self) {
        self.active = None;
        self.releases += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Committed,
    Aborted,
    Dropped,
}

/// Flash slot that only reports an image as bootable after a commit.
#[derive(Debug)]
pub struct FakeFlash {
    pub capacity: u64,
    pub fail_write_at: Option<u64>,
    pub short_write: bool,
    pub reject_commit: Option<String>,
    pub opened_with: Vec<u64>,
    pub staged: Vec<u8>,
    pub bootable: Option<Vec<u8>>,
    pub ends: Vec<SessionEnd>,
}

impl FakeFlash {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            fail_write_at: None,
            short_write: false,
            reject_commit: None,
            opened_with: Vec::new(),
            staged: Vec::new(),
            bootable: None,
            ends: Vec::new(),
        }
    }
}

pub struct FakeSession<'a> {
    flash: &'a mut FakeFlash,
    ended: bool,
}

impl FlashWriter for FakeFlash {
    type Session<'a> = FakeSession<'a>;

    fn open(&mut self, expected_size: u64) -> Result<Self::Session<'_>, FlashError> {
        self.opened_with.push(expected_size);
        if expected_size > self.capacity {
            return Err(FlashError::InsufficientSpace {
                requested: expected_size,
                capacity: self.capacity,
            });
        }
        self.staged.clear();
        Ok(FakeSession {
            flash: self,
            ended: false,
        })
    }
}

impl FlashSession for FakeSession<'_> {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, FlashError> {
        if let Some(at) = self.flash.fail_write_at {
            if self.flash.staged.len() as u64 + bytes.len() as u64 > at {
                return Err(FlashError::Write("ESP_ERR_FLASH_OP_FAIL".into()));
            }
        }
        let accepted = if self.flash.short_write && bytes.len() > 1 {
            bytes.len() - 1
        } else {
            bytes.len()
        };
        self.flash.staged.extend_from_slice(&bytes[..accepted]);
        Ok(accepted)
    }

    fn abort(mut self) -> Result<(), FlashError> {
        self.ended = true;
        self.flash.staged.clear();
        self.flash.ends.push(SessionEnd::Aborted);
        Ok(())
    }

    fn commit(mut self) -> Result<(), FlashError> {
        self.ended = true;
        if let Some(reason) = self.flash.reject_commit.clone() {
            self.flash.staged.clear();
            self.flash.ends.push(SessionEnd::Aborted);
            return Err(FlashError::Commit(reason));
        }
        self.flash.bootable = Some(std::mem::take(&mut self.flash.staged));
        self.flash.ends.push(SessionEnd::Committed);
        Ok(())
    }
}

impl Drop for FakeSession<'_> {
    fn drop(&mut self) {
        if !self.ended {
            self.flash.staged.clear();
            self.flash.ends.push(SessionEnd::Dropped);
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeRestart {
    pub count: usize,
}

impl Restart for FakeRestart {
    fn restart(&mut self) {
        self.count += 1;
    }
}

/// Associates after a fixed number of polls.
#[derive(Debug)]
pub struct FakeAssociation {
    pub associate_after: Option<u32>,
    pub polls: u32,
}

impl Association for FakeAssociation {
    fn is_associated(&mut self) -> bool {
        self.polls += 1;
        self.associate_after.is_some_and(|after| self.polls >= after)
    }
}

#[derive(Debug, Default)]
pub struct FakePin {
    pub levels: Vec<bool>,
    pub fail: bool,
}

impl IndicatorPin for FakePin {
    fn set_high(&mut self, high: bool) -> Result<(), PinError> {
        if self.fail {
            return Err(PinError("gpio driver gone".into()));
        }
        self.levels.push(high);
        Ok(())
    }
}
