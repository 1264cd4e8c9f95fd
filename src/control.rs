//! Counter control socket.
//!
//! A running `counterd` listens on a loopback TCP address. Each connection
//! carries one JSON request line and gets one JSON reply line:
//!
//! ```text
//! {"op":"show"}
//! {"op":"adjust","section":"reserved","delta":-1}
//! {"op":"schedule","start_hour":8,"end_hour":17}
//! ```
//!
//! Requests go through the `CounterInbox`, so manual adjustments are applied
//! in order with the crossings the pipeline delivers and saved by the one
//! writer that owns the store.

use anyhow::{anyhow, Context, Result};
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::occupancy::{AdminSchedule, CounterInbox, Occupancy, Section};

const MAX_REQUEST_BYTES: u64 = 4096;
const IO_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ControlRequest {
    Show,
    Adjust { section: Section, delta: i32 },
    Schedule { start_hour: u32, end_hour: u32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct ControlReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    occupancy: Option<Occupancy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn local_hour() -> u32 {
    chrono::Local::now().hour()
}

pub struct ControlServer {
    addr: String,
    inbox: CounterInbox,
    hour: fn() -> u32,
}

impl ControlServer {
    pub fn new(addr: &str, inbox: CounterInbox) -> Self {
        Self {
            addr: addr.to_string(),
            inbox,
            hour: local_hour,
        }
    }

    /// Override the wall clock used to re-apply a new schedule.
    pub fn with_clock(mut self, hour: fn() -> u32) -> Self {
        self.hour = hour;
        self
    }

    pub fn spawn(self) -> Result<ControlHandle> {
        let configured: SocketAddr = self
            .addr
            .parse()
            .map_err(|_| anyhow!("control address '{}' is not a socket address", self.addr))?;
        if !configured.ip().is_loopback() {
            return Err(anyhow!("control socket must bind a loopback address, got {}", configured));
        }
        let listener = TcpListener::bind(configured)
            .with_context(|| format!("bind control socket {}", configured))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("counter-control".to_string())
            .spawn(move || {
                if let Err(err) = self.serve(listener, &shutdown_thread) {
                    log::error!("control socket stopped: {:#}", err);
                }
            })
            .context("spawn control socket")?;
        log::info!("control socket listening on {}", addr);

        Ok(ControlHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }

    fn serve(&self, listener: TcpListener, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = self.handle_connection(stream, peer) {
                        log::warn!("control request from {} rejected: {:#}", peer, err);
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        if !peer.ip().is_loopback() {
            return Err(anyhow!("non-loopback peer"));
        }
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;

        let mut line = String::new();
        BufReader::new((&stream).take(MAX_REQUEST_BYTES)).read_line(&mut line)?;
        if line.trim().is_empty() {
            return Ok(());
        }
        let reply = match serde_json::from_str::<ControlRequest>(line.trim()) {
            Ok(request) => {
                log::debug!("control request from {}: {:?}", peer, request);
                match self.execute(request) {
                    Ok(occupancy) => ControlReply {
                        occupancy: Some(occupancy),
                        error: None,
                    },
                    Err(err) => ControlReply {
                        occupancy: None,
                        error: Some(format!("{:#}", err)),
                    },
                }
            }
            Err(err) => ControlReply {
                occupancy: None,
                error: Some(format!("invalid request: {}", err)),
            },
        };

        let mut payload = serde_json::to_vec(&reply)?;
        payload.push(b'\n');
        (&stream).write_all(&payload)?;
        Ok(())
    }

    fn execute(&self, request: ControlRequest) -> Result<Occupancy> {
        match request {
            ControlRequest::Show => {}
            ControlRequest::Adjust { section, delta } => {
                self.inbox.adjust(section, delta)?;
            }
            ControlRequest::Schedule {
                start_hour,
                end_hour,
            } => {
                let schedule = AdminSchedule::new(start_hour, end_hour)?;
                self.inbox.set_schedule(schedule, (self.hour)())?;
            }
        }
        self.inbox.snapshot()
    }
}

#[derive(Debug)]
pub struct ControlHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ControlHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("control socket thread panicked"))?;
        }
        Ok(())
    }
}

/// Client side, used by the `occupancy` tool.
#[derive(Debug)]
pub struct ControlClient {
    addr: SocketAddr,
}

impl ControlClient {
    pub fn new(addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| anyhow!("control address '{}' is not a socket address", addr))?;
        Ok(Self { addr })
    }

    pub fn send(&self, request: &ControlRequest) -> Result<Occupancy> {
        self.try_send(request)?
            .ok_or_else(|| anyhow!("counterd is not listening on {}", self.addr))
    }

    /// Like `send`, but `Ok(None)` when nothing listens on the address,
    /// i.e. counterd is not running.
    pub fn try_send(&self, request: &ControlRequest) -> Result<Option<Occupancy>> {
        let stream = match TcpStream::connect_timeout(&self.addr, CONNECT_TIMEOUT) {
            Ok(stream) => stream,
            Err(err) if err.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(None),
            Err(err) => return Err(anyhow!("connect to counterd at {}: {}", self.addr, err)),
        };
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;

        let mut payload = serde_json::to_vec(request)?;
        payload.push(b'\n');
        (&stream).write_all(&payload)?;

        let mut line = String::new();
        BufReader::new(&stream)
            .read_line(&mut line)
            .context("read counterd reply")?;
        let reply: ControlReply =
            serde_json::from_str(line.trim()).context("invalid counterd reply")?;
        match (reply.occupancy, reply.error) {
            (_, Some(error)) => Err(anyhow!("counterd: {}", error)),
            (Some(occupancy), None) => Ok(Some(occupancy)),
            (None, None) => Err(anyhow!("counterd sent an empty reply")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::{CounterService, MemoryOccupancyStore};
    use crate::CrossingEvent;
    use crate::EventSink;

    fn ten_oclock() -> u32 {
        10
    }

    #[test]
    fn requests_use_tagged_json() {
        let json = serde_json::to_string(&ControlRequest::Adjust {
            section: Section::Reserved,
            delta: -1,
        })
        .unwrap();
        assert_eq!(json, r#"{"op":"adjust","section":"reserved","delta":-1}"#);
        let show: ControlRequest = serde_json::from_str(r#"{"op":"show"}"#).unwrap();
        assert_eq!(show, ControlRequest::Show);
    }

    #[test]
    fn adjustments_are_ordered_with_crossings() -> Result<()> {
        let counter = CounterService::spawn(MemoryOccupancyStore::default(), 10)?;
        let control = ControlServer::new("127.0.0.1:0", counter.inbox())
            .with_clock(ten_oclock)
            .spawn()?;
        let client = ControlClient::new(&control.addr().to_string())?;

        let mut inbox = counter.inbox();
        inbox.deliver(CrossingEvent::entered(Duration::ZERO))?;
        let occ = client.send(&ControlRequest::Adjust {
            section: Section::Reserved,
            delta: 1,
        })?;
        assert_eq!(occ.occupied(Section::Reserved), 1);
        assert_eq!(occ.general(), 2);

        let err = client
            .send(&ControlRequest::Adjust {
                section: Section::Ambulance,
                delta: 2,
            })
            .err();
        assert!(err.is_some_and(|e| e.to_string().contains("ambulance")));

        let occ = client.send(&ControlRequest::Schedule {
            start_hour: 12,
            end_hour: 13,
        })?;
        assert_eq!(occ.occupied(Section::Executive), 0);

        control.stop()?;
        let last = counter.shutdown()?;
        assert_eq!(last.occupied(Section::Reserved), 1);
        assert_eq!(last.schedule(), AdminSchedule::new(12, 13)?);
        Ok(())
    }

    #[test]
    fn malformed_requests_get_an_error_reply() -> Result<()> {
        let counter = CounterService::spawn(MemoryOccupancyStore::default(), 10)?;
        let control = ControlServer::new("127.0.0.1:0", counter.inbox()).spawn()?;

        let stream = TcpStream::connect(control.addr())?;
        (&stream).write_all(b"{\"op\":\"reboot\"}\n")?;
        let mut line = String::new();
        BufReader::new(&stream).read_line(&mut line)?;
        assert!(line.contains("invalid request"));

        control.stop()?;
        counter.shutdown()?;
        Ok(())
    }

    #[test]
    fn refuses_non_loopback_bind() {
        let counter = CounterService::spawn(MemoryOccupancyStore::default(), 10).unwrap();
        assert!(ControlServer::new("0.0.0.0:0", counter.inbox()).spawn().is_err());
        counter.shutdown().unwrap();
    }

    #[test]
    fn client_reports_no_daemon_when_nothing_listens() -> Result<()> {
        // Bind then drop to find a port with no listener.
        let addr = TcpListener::bind("127.0.0.1:0")?.local_addr()?;
        let client = ControlClient::new(&addr.to_string())?;
        assert!(client.try_send(&ControlRequest::Show)?.is_none());
        assert!(client.send(&ControlRequest::Show).is_err());
        Ok(())
    }

}
