//! Per-connection state for one of the two long-lived TCP sessions
//! (spec.md §4.4): the write half, its wait list, its receive buffer,
//! and the dedicated reader thread that turns blocking reads into
//! messages on a channel the engine thread owns exclusively.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Which of the two long-lived sessions an event or wait-list entry
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionTag {
    Command,
    Poll,
}

/// Raw I/O events a session's reader thread produces. The engine thread
/// is the sole consumer.
#[derive(Debug)]
pub enum SessionIo {
    Data(SessionTag, Vec<u8>),
    Timeout(SessionTag),
    Closed(SessionTag),
    Error(SessionTag, std::io::Error),
}

/// One long-lived TCP connection plus the protocol bookkeeping the
/// demultiplexer and request/poll engines need on top of it.
pub struct Session {
    pub tag: SessionTag,
    writer: TcpStream,
    reader_thread: Option<JoinHandle<()>>,
    pub wait_list: VecDeque<i32>,
    pub recv_buffer: Vec<u8>,
}

impl Session {
    /// Connect to `addr`, apply `timeout`/`keep_alive`, and spawn the
    /// reader thread that forwards raw bytes to `sender`.
    pub fn connect(
        tag: SessionTag,
        addr: SocketAddr,
        timeout: Duration,
        keep_alive: bool,
        sender: Sender<SessionIo>,
    ) -> std::io::Result<Session> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        if keep_alive {
            set_keepalive(&stream);
        }
        let reader_stream = stream.try_clone()?;
        let read_timeout = if timeout.is_zero() { None } else { Some(timeout) };
        let reader_thread = Some(spawn_reader(tag, reader_stream, read_timeout, sender));
        Ok(Session {
            tag,
            writer: stream,
            reader_thread,
            wait_list: VecDeque::new(),
            recv_buffer: Vec::new(),
        })
    }

    /// Write an already-encoded request frame.
    pub fn write_request(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes)
    }

    /// Whether this session currently has any response outstanding.
    pub fn has_outstanding(&self) -> bool {
        !self.wait_list.is_empty()
    }

    /// Remove the first occurrence of `command_id` from the wait list,
    /// matching by id rather than position so an interleaving peer is
    /// tolerated (spec.md §5).
    pub fn take_waiting(&mut self, command_id: i32) -> bool {
        if let Some(pos) = self.wait_list.iter().position(|&id| id == command_id) {
            self.wait_list.remove(pos);
            true
        } else {
            false
        }
    }

    /// Tear down the socket (shutting it down so the reader thread's
    /// blocking read unblocks), clear the wait list and receive buffer.
    /// Does not join the reader thread — it will exit on its own once
    /// the shutdown unblocks its read.
    pub fn reset(&mut self) {
        let _ = self.writer.shutdown(Shutdown::Both);
        self.wait_list.clear();
        self.recv_buffer.clear();
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.writer.shutdown(Shutdown::Both);
    }
}

fn spawn_reader(
    tag: SessionTag,
    mut stream: TcpStream,
    timeout: Option<Duration>,
    sender: Sender<SessionIo>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        if stream.set_read_timeout(timeout).is_err() {
            let _ = sender.send(SessionIo::Error(
                tag,
                std::io::Error::new(std::io::ErrorKind::Other, "failed to set read timeout"),
            ));
            return;
        }
        let mut buf = [0u8; 8192];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    let _ = sender.send(SessionIo::Closed(tag));
                    return;
                }
                Ok(n) => {
                    if sender.send(SessionIo::Data(tag, buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    if sender.send(SessionIo::Timeout(tag)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = sender.send(SessionIo::Error(tag, e));
                    return;
                }
            }
        }
    })
}

#[cfg(unix)]
fn set_keepalive(stream: &TcpStream) {
    use std::os::unix::io::AsRawFd;
    // std exposes no keepalive knob on TcpStream; this is the minimal
    // raw-socket escape hatch, gated to Unix platforms.
    let fd = stream.as_raw_fd();
    let enable: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &enable as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        log::warn!(
            "failed to enable SO_KEEPALIVE: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn set_keepalive(_stream: &TcpStream) {
    log::warn!("TCP keepalive is not implemented on this platform");
}
