//! Execution Context: mio event loop di thread sendiri
//!
//! Semua socket I/O (accept, connect, read, write) terjadi di sini.
//! Application thread berkomunikasi lewat `Command` yang dikirim ke channel
//! lalu membangunkan `Poll` dengan `Waker`.
//!
//! Setiap connection punya `Pipeline`: pasangan `FrameReader` / `FrameWriter`
//! yang dilanjutkan setiap kali socket readable / writable.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::net::Shutdown;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, trace, warn};

use super::connection::{Connection, ConnectionState, OwnedMessage};
use super::socket;
use crate::config::SocketOptions;
use crate::core::TsQueue;
use crate::error::{Error, Result};
use crate::protocol::{FrameReader, FrameWriter, MessageKind};

pub(crate) const WAKER_TOKEN: Token = Token(0);
pub(crate) const LISTENER_TOKEN: Token = Token(1);
const FIRST_CONNECTION_TOKEN: usize = 2;

/// Batas error accept berturut-turut dalam satu readiness event
const MAX_ACCEPT_FAILURES: usize = 64;

/// Langkah accept loop setelah `accept()` gagal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptStep {
    /// Backlog kosong
    Drained,
    /// Error milik satu connection (aborted, reset, ditolak firewall)
    Retry,
    /// Kehabisan fd atau memori
    Exhausted,
}

fn accept_step(err: &io::Error) -> AcceptStep {
    if err.kind() == io::ErrorKind::WouldBlock {
        AcceptStep::Drained
    } else if socket::is_resource_exhausted(err) {
        AcceptStep::Exhausted
    } else {
        AcceptStep::Retry
    }
}

/// Pekerjaan yang di-post dari luar execution thread
pub(crate) enum Command<T: MessageKind> {
    /// Mulai menjalankan pipeline untuk stream ini
    Attach {
        connection: Arc<Connection<T>>,
        stream: TcpStream,
    },
    /// Ada pesan baru di outbound queue
    Flush(Token),
    /// Tutup socket, pipeline berhenti
    Close(Token),
    Stop,
}

/// Handle murah (clone) untuk post command ke execution context
pub(crate) struct ContextHandle<T: MessageKind> {
    commands: Sender<Command<T>>,
    waker: Arc<Waker>,
    next_token: Arc<AtomicUsize>,
}

impl<T: MessageKind> Clone for ContextHandle<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            waker: Arc::clone(&self.waker),
            next_token: Arc::clone(&self.next_token),
        }
    }
}

impl<T: MessageKind> ContextHandle<T> {
    pub(crate) fn new(commands: Sender<Command<T>>, waker: Arc<Waker>) -> Self {
        Self {
            commands,
            waker,
            next_token: Arc::new(AtomicUsize::new(FIRST_CONNECTION_TOKEN)),
        }
    }

    /// Kirim command lalu bangunkan poll
    pub(crate) fn post(&self, command: Command<T>) {
        if self.commands.send(command).is_err() {
            // Loop sudah berhenti; socket-nya ikut tertutup
            trace!("execution context gone, command dropped");
            return;
        }
        if let Err(err) = self.waker.wake() {
            warn!(error = %err, "failed to wake execution context");
        }
    }

    /// Token tidak pernah dipakai ulang, jadi event basi untuk
    /// connection yang sudah ditutup aman diabaikan.
    pub(crate) fn next_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }
}

/// Listener beserta cara server memutuskan accept / deny
pub(crate) struct Acceptor<T: MessageKind> {
    pub(crate) listener: TcpListener,
    pub(crate) inbound: Arc<TsQueue<OwnedMessage<T>>>,
    /// Dipanggil di execution thread untuk setiap stream baru.
    /// `true` = connection diterima (ID sudah di-assign oleh server).
    pub(crate) on_accept: Box<dyn FnMut(&Arc<Connection<T>>) -> bool + Send>,
}

/// Execution context: poll loop + thread-nya
pub(crate) struct Context<T: MessageKind> {
    handle: ContextHandle<T>,
    thread: Option<JoinHandle<()>>,
}

impl<T: MessageKind> Context<T> {
    /// Siapkan poll, register listener (jika ada), baru spawn thread.
    ///
    /// Listener sudah terdaftar sebelum thread jalan, jadi loop selalu
    /// punya pekerjaan. Kalau setup gagal tidak ada thread yang tertinggal.
    pub(crate) fn spawn(
        name: &str,
        options: &SocketOptions,
        mut acceptor: Option<Acceptor<T>>,
    ) -> Result<Self> {
        let poll = Poll::new().map_err(Error::Poll)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN).map_err(Error::Poll)?);

        if let Some(acceptor) = acceptor.as_mut() {
            poll.registry()
                .register(&mut acceptor.listener, LISTENER_TOKEN, Interest::READABLE)
                .map_err(Error::Poll)?;
        }

        let (tx, rx) = mpsc::channel();
        let handle = ContextHandle::new(tx, waker);

        let event_loop = EventLoop {
            poll,
            events: Events::with_capacity(options.events_capacity),
            ready: Vec::with_capacity(options.events_capacity),
            commands: rx,
            handle: handle.clone(),
            acceptor,
            pipelines: HashMap::new(),
            options: options.clone(),
        };

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || event_loop.run())
            .map_err(Error::Spawn)?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub(crate) fn handle(&self) -> &ContextHandle<T> {
        &self.handle
    }

    /// Hentikan loop dan join thread. Idempotent.
    pub(crate) fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.handle.post(Command::Stop);
            if thread.join().is_err() {
                error!("execution thread panicked");
            }
        }
    }
}

impl<T: MessageKind> Drop for Context<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State per connection yang hanya disentuh execution thread
struct Pipeline<T: MessageKind> {
    connection: Arc<Connection<T>>,
    stream: TcpStream,
    reader: FrameReader<T>,
    writer: FrameWriter<T>,
    connecting: bool,
}

impl<T: MessageKind> Pipeline<T> {
    fn on_ready(&mut self, readable: bool, writable: bool) -> io::Result<()> {
        if self.connecting {
            if !self.finish_connect()? {
                return Ok(());
            }
            // Pesan yang di-send selama Connecting sudah menunggu
            self.flush()?;
            return self.read();
        }

        if readable {
            self.read()?;
        }
        if writable {
            self.flush()?;
        }
        Ok(())
    }

    /// Cek hasil non-blocking connect. `Ok(true)` = baru saja tersambung.
    fn finish_connect(&mut self) -> io::Result<bool> {
        if let Some(err) = self.stream.take_error()? {
            return Err(err);
        }
        match self.stream.peer_addr() {
            Ok(peer) => {
                self.connecting = false;
                self.connection.mark_connected();
                info!(peer = %peer, "connected to server");
                Ok(true)
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::NotConnected
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Baca sampai WouldBlock (mio edge-triggered)
    fn read(&mut self) -> io::Result<()> {
        while let Some(message) = self.reader.read_from(&mut self.stream)? {
            trace!(id = self.connection.id(), %message, "frame received");
            self.connection.deliver(message);
        }
        Ok(())
    }

    /// Kuras outbound queue sampai kosong atau socket WouldBlock
    fn flush(&mut self) -> io::Result<()> {
        if self.connecting {
            return Ok(());
        }
        loop {
            if self.writer.is_idle() {
                match self.connection.next_outbound() {
                    Some(message) => self.writer.start(message),
                    None => {
                        if self.connection.release_writer() {
                            return Ok(());
                        }
                        continue;
                    }
                }
            }
            if !self.writer.write_to(&mut self.stream)? {
                // Lanjut saat event writable berikutnya
                return Ok(());
            }
        }
    }
}

struct EventLoop<T: MessageKind> {
    poll: Poll,
    events: Events,
    ready: Vec<(Token, bool, bool)>,
    commands: Receiver<Command<T>>,
    handle: ContextHandle<T>,
    acceptor: Option<Acceptor<T>>,
    pipelines: HashMap<Token, Pipeline<T>>,
    options: SocketOptions,
}

impl<T: MessageKind> EventLoop<T> {
    fn run(mut self) {
        debug!("execution context running");

        loop {
            if let Err(err) = self.poll.poll(&mut self.events, None) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %err, "poll failed, execution context exiting");
                break;
            }

            // Command duluan: Attach harus terproses sebelum event stream-nya
            if !self.process_commands() {
                break;
            }

            let mut ready = mem::take(&mut self.ready);
            ready.extend(self.events.iter().map(|event| {
                (
                    event.token(),
                    event.is_readable() || event.is_read_closed() || event.is_error(),
                    event.is_writable() || event.is_write_closed(),
                )
            }));

            for &(token, readable, writable) in &ready {
                match token {
                    WAKER_TOKEN => {}
                    LISTENER_TOKEN => self.accept(),
                    token => self.drive(token, readable, writable),
                }
            }

            ready.clear();
            self.ready = ready;
        }

        self.shutdown();
        debug!("execution context stopped");
    }

    /// Returns `false` saat menerima `Stop`
    fn process_commands(&mut self) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Attach { connection, stream } => self.attach(connection, stream),
                Command::Flush(token) => {
                    if let Some(pipeline) = self.pipelines.get_mut(&token) {
                        if let Err(err) = pipeline.flush() {
                            self.teardown(token, Some(err));
                        }
                    }
                }
                Command::Close(token) => self.teardown(token, None),
                Command::Stop => return false,
            }
        }
        true
    }

    /// Accept semua stream yang pending. Listener tetap terdaftar,
    /// jadi selalu ada satu accept yang menunggu.
    fn accept(&mut self) {
        let Some(acceptor) = self.acceptor.as_mut() else {
            return;
        };

        let mut approved = Vec::new();
        let mut failures = 0;
        loop {
            match acceptor.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "new connection");
                    let connection = Arc::new(Connection::new_server(
                        self.handle.next_token(),
                        peer,
                        Arc::clone(&acceptor.inbound),
                        self.handle.clone(),
                    ));
                    if (acceptor.on_accept)(&connection) {
                        approved.push((connection, stream));
                    }
                    // Ditolak: stream di-drop di sini, socket tertutup
                }
                Err(e) => match accept_step(&e) {
                    AcceptStep::Drained => break,
                    AcceptStep::Retry if failures < MAX_ACCEPT_FAILURES => {
                        // Edge-triggered: berhenti di sini meninggalkan
                        // connection lain di backlog tanpa event baru
                        failures += 1;
                        debug!(error = %e, "accept failed for one connection");
                    }
                    AcceptStep::Retry => {
                        warn!(error = %e, failures, "accept keeps failing, waiting for next event");
                        break;
                    }
                    AcceptStep::Exhausted => {
                        error!(error = %e, "accept out of resources, backlog left pending");
                        break;
                    }
                },
            }
        }

        for (connection, stream) in approved {
            self.attach(connection, stream);
        }
    }

    fn attach(&mut self, connection: Arc<Connection<T>>, mut stream: TcpStream) {
        let token = connection.token();

        if connection.is_terminated() {
            debug!(id = connection.id(), "connection closed before attach");
            return;
        }
        if let Err(err) = socket::tune(&stream, &self.options) {
            debug!(error = %err, "socket tuning failed");
        }
        if let Err(err) = self.poll.registry().register(
            &mut stream,
            token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            warn!(error = %err, "failed to register connection");
            connection.mark_disconnected();
            return;
        }

        let connecting = connection.state() == ConnectionState::Connecting;
        self.pipelines.insert(
            token,
            Pipeline {
                connection,
                stream,
                reader: FrameReader::new(self.options.max_body_size),
                writer: FrameWriter::new(),
                connecting,
            },
        );
    }

    fn drive(&mut self, token: Token, readable: bool, writable: bool) {
        let Some(pipeline) = self.pipelines.get_mut(&token) else {
            trace!(?token, "event for closed connection");
            return;
        };
        if let Err(err) = pipeline.on_ready(readable, writable) {
            self.teardown(token, Some(err));
        }
    }

    /// Tutup socket dan lepaskan pipeline. Tidak ada retry.
    fn teardown(&mut self, token: Token, reason: Option<io::Error>) {
        let Some(mut pipeline) = self.pipelines.remove(&token) else {
            return;
        };
        let connection = &pipeline.connection;

        match reason {
            None => debug!(id = connection.id(), "connection closed locally"),
            Some(ref err) if pipeline.connecting => {
                warn!(error = %err, "connect failed")
            }
            Some(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                info!(id = connection.id(), "peer closed connection")
            }
            Some(ref err) => warn!(id = connection.id(), error = %err, "connection failed"),
        }
        if !pipeline.writer.is_idle() {
            debug!(id = connection.id(), "in-flight frame aborted");
        }

        if let Err(err) = self.poll.registry().deregister(&mut pipeline.stream) {
            trace!(error = %err, "deregister failed");
        }
        if let Err(err) = pipeline.stream.shutdown(Shutdown::Both) {
            trace!(error = %err, "shutdown failed");
        }
        connection.mark_disconnected();
    }

    fn shutdown(&mut self) {
        let tokens: Vec<Token> = self.pipelines.keys().copied().collect();
        for token in tokens {
            self.teardown(token, None);
        }
        if let Some(mut acceptor) = self.acceptor.take() {
            if let Err(err) = self.poll.registry().deregister(&mut acceptor.listener) {
                trace!(error = %err, "listener deregister failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_continues_past_failed_connection() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::PermissionDenied,
            io::ErrorKind::Interrupted,
        ] {
            assert_eq!(accept_step(&io::Error::from(kind)), AcceptStep::Retry);
        }
    }

    #[test]
    fn test_accept_stops_when_backlog_drained() {
        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(accept_step(&err), AcceptStep::Drained);
    }

    #[cfg(unix)]
    #[test]
    fn test_accept_stops_on_fd_exhaustion() {
        let err = io::Error::from_raw_os_error(libc::EMFILE);
        assert_eq!(accept_step(&err), AcceptStep::Exhausted);
    }
}
