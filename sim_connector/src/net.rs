use crate::error::TransportError;
use crate::protocol::{InboundMsg, OutboundMsg, RelayReply, OUTBOUND_CAP};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tungstenite::protocol::frame::coding::{Data, OpCode};
use tungstenite::protocol::frame::Frame;
use tungstenite::protocol::Message;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::WebSocket;

/// Largest payload carried by one outbound frame.
pub const SEGMENT_SIZE: usize = 1024;
const CLOSE_GRACE: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_millis(30);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const FORWARD_WAIT: Duration = Duration::from_millis(50);

type RelaySocket = WebSocket<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Closed,
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Connected,
    AlreadyOpen,
}

struct ActiveLink {
    out_tx: Sender<OutboundMsg>,
    shutdown: Arc<AtomicBool>,
    join_handle: JoinHandle<()>,
}

/// Client side of the relay socket. One background thread owns the socket;
/// every outbound message goes through its queue, so sends never interleave.
pub struct RelayTransport {
    in_tx: Sender<InboundMsg>,
    state: TransportState,
    link: Option<ActiveLink>,
}

impl RelayTransport {
    pub fn new(in_tx: Sender<InboundMsg>) -> Self {
        Self {
            in_tx,
            state: TransportState::Closed,
            link: None,
        }
    }

    pub fn state(&self) -> TransportState {
        match &self.link {
            Some(link) if link.join_handle.is_finished() => TransportState::Closed,
            _ => self.state,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Opens the socket and sends `greeting` before the receive loop starts,
    /// so a failed greeting is reported here rather than lost in the loop.
    pub fn connect(
        &mut self,
        url: &str,
        greeting: &RelayReply,
    ) -> Result<ConnectStatus, TransportError> {
        if self.is_open() {
            return Ok(ConnectStatus::AlreadyOpen);
        }
        self.disconnect();

        self.state = TransportState::Connecting;
        let mut ws = match tungstenite::connect(url) {
            Ok((ws, _response)) => ws,
            Err(e) => {
                self.state = TransportState::Closed;
                return Err(TransportError::Connect(e));
            }
        };
        configure_stream(&mut ws);

        if let Err(e) = send_segmented(&mut ws, &greeting.to_string()) {
            self.state = TransportState::Closed;
            return Err(TransportError::Send(e));
        }

        let (out_tx, out_rx) = bounded(OUTBOUND_CAP);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_thread = Arc::clone(&shutdown);
        let in_tx = self.in_tx.clone();

        let spawned = thread::Builder::new()
            .name("relay-transport".to_string())
            .spawn(move || run_link(ws, in_tx, out_rx, shutdown_for_thread));
        let join_handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                self.state = TransportState::Closed;
                return Err(TransportError::Spawn(e));
            }
        };

        self.link = Some(ActiveLink {
            out_tx,
            shutdown,
            join_handle,
        });
        self.state = TransportState::Open;
        info!(url, "relay connected");
        Ok(ConnectStatus::Connected)
    }

    pub fn send(&self, msg: RelayReply) -> Result<(), TransportError> {
        let Some(link) = self.link.as_ref() else {
            return Err(TransportError::NotOpen);
        };
        match link.out_tx.try_send(OutboundMsg::Send { msg }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::Busy),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::NotOpen),
        }
    }

    /// Closes the socket (with a grace period for the peer's close frame) and
    /// waits for the receive loop to exit.
    pub fn disconnect(&mut self) {
        let Some(link) = self.link.take() else {
            self.state = TransportState::Closed;
            return;
        };
        self.state = TransportState::Closing;
        link.shutdown.store(true, Ordering::Relaxed);
        drop(link.out_tx);
        if link.join_handle.join().is_err() {
            warn!("relay thread panicked");
        }
        self.state = TransportState::Closed;
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn configure_stream(ws: &mut RelaySocket) {
    if let MaybeTlsStream::Plain(stream) = ws.get_mut() {
        let _ = stream.set_nodelay(true);
        let _ = stream.set_read_timeout(Some(READ_TIMEOUT));
        let _ = stream.set_write_timeout(Some(WRITE_TIMEOUT));
    }
}

fn run_link(
    mut ws: RelaySocket,
    in_tx: Sender<InboundMsg>,
    out_rx: Receiver<OutboundMsg>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            close_gracefully(&mut ws);
            return;
        }

        // Outbound: drain queued replies.
        loop {
            match out_rx.try_recv() {
                Ok(OutboundMsg::Send { msg }) => {
                    if let Err(e) = send_segmented(&mut ws, &msg.to_string()) {
                        warn!("relay send failed: {e}");
                        forward(&in_tx, InboundMsg::PeerClosed, &shutdown);
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    close_gracefully(&mut ws);
                    return;
                }
            }
        }

        // Inbound: the read timeout keeps the loop moving.
        match ws.read() {
            Ok(Message::Text(text)) => {
                if !forward(&in_tx, InboundMsg::Text(text.to_string()), &shutdown) {
                    close_gracefully(&mut ws);
                    return;
                }
            }
            Ok(Message::Close(frame)) => {
                debug!(?frame, "relay peer closed");
                // Flushes the close reply queued by tungstenite.
                let _ = ws.flush();
                forward(&in_tx, InboundMsg::PeerClosed, &shutdown);
                return;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                forward(&in_tx, InboundMsg::PeerClosed, &shutdown);
                return;
            }
            Err(e) => {
                warn!("relay read failed: {e}");
                forward(&in_tx, InboundMsg::PeerClosed, &shutdown);
                return;
            }
        }
    }
}

/// Hands `msg` to the host loop, waiting while the queue is full. Gives up
/// once shutdown is requested or the receiver is gone, so a join on this
/// thread always returns.
fn forward(in_tx: &Sender<InboundMsg>, mut msg: InboundMsg, shutdown: &AtomicBool) -> bool {
    loop {
        match in_tx.send_timeout(msg, FORWARD_WAIT) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                if shutdown.load(Ordering::Relaxed) {
                    debug!("inbound queue full at shutdown, message dropped");
                    return false;
                }
                msg = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

fn close_gracefully(ws: &mut RelaySocket) {
    if ws.close(None).is_err() {
        return;
    }
    let deadline = Instant::now() + CLOSE_GRACE;
    while Instant::now() < deadline {
        match ws.read() {
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(_) => break,
        }
    }
}

/// Sends `text` as one message split over frames of at most
/// [`SEGMENT_SIZE`] bytes. Returns the number of frames written.
fn send_segmented(ws: &mut RelaySocket, text: &str) -> Result<usize, tungstenite::Error> {
    let frames = message_frames(text);
    let count = frames.len();
    for frame in frames {
        ws.write(Message::Frame(frame))?;
    }
    ws.flush()?;
    Ok(count)
}

/// A text frame followed by continuation frames; only the last is final.
fn message_frames(text: &str) -> Vec<Frame> {
    let segments = segment_message(text, SEGMENT_SIZE);
    let count = segments.len();
    segments
        .into_iter()
        .enumerate()
        .map(|(i, segment)| {
            let opcode = if i == 0 {
                OpCode::Data(Data::Text)
            } else {
                OpCode::Data(Data::Continue)
            };
            Frame::message(segment.as_bytes().to_vec(), opcode, i + 1 == count)
        })
        .collect()
}

/// Splits on char boundaries so every segment is valid UTF-8 on its own.
/// An empty message yields no segments.
pub fn segment_message(text: &str, max_bytes: usize) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + max_bytes).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // max_bytes smaller than one char: take the whole char.
            end = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
        segments.push(&text[start..end]);
        start = end;
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_count_is_ceil_of_length() {
        for len in [1usize, 1023, 1024, 1025, 2048, 5000] {
            let msg = "x".repeat(len);
            let segments = segment_message(&msg, SEGMENT_SIZE);
            assert_eq!(segments.len(), len.div_ceil(SEGMENT_SIZE), "len {len}");
            assert!(segments.iter().all(|s| s.len() <= SEGMENT_SIZE));
            assert_eq!(segments.concat(), msg);
        }
    }

    #[test]
    fn empty_message_has_no_segments() {
        assert!(segment_message("", SEGMENT_SIZE).is_empty());
    }

    #[test]
    fn multibyte_chars_are_never_split() {
        let msg = "é".repeat(600);
        let segments = segment_message(&msg, SEGMENT_SIZE);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].len(), 1024);
        assert_eq!(segments.concat(), msg);

        let odd = format!("a{}", "€".repeat(400));
        for s in segment_message(&odd, SEGMENT_SIZE) {
            assert!(s.len() <= SEGMENT_SIZE);
        }
    }

    #[test]
    fn only_the_last_frame_is_final() {
        let frames = message_frames(&"v".repeat(2500));
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].header().opcode, OpCode::Data(Data::Text));
        assert_eq!(frames[1].header().opcode, OpCode::Data(Data::Continue));
        assert_eq!(frames[2].header().opcode, OpCode::Data(Data::Continue));
        let finals: Vec<bool> = frames.iter().map(|f| f.header().is_final).collect();
        assert_eq!(finals, vec![false, false, true]);
        assert_eq!(frames[2].payload().len(), 2500 - 2 * SEGMENT_SIZE);

        let single = message_frames("STATUS:TRUE");
        assert_eq!(single.len(), 1);
        assert!(single[0].header().is_final);
    }

    #[test]
    fn disconnect_finishes_with_a_full_inbound_queue() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut ws = tungstenite::accept(stream).unwrap();
            for i in 0..5 {
                ws.send(Message::Text(format!("GET_VAR:L:BACKLOG_{i}").into()))
                    .unwrap();
            }
            // Keep reading so the close handshake completes.
            while ws.read().is_ok() {}
        });

        let (in_tx, in_rx) = bounded(1);
        let mut transport = RelayTransport::new(in_tx);
        transport
            .connect(&format!("ws://{addr}/ws/"), &RelayReply::Handshake)
            .unwrap();
        thread::sleep(Duration::from_millis(300));
        assert!(in_rx.is_full());

        let (done_tx, done_rx) = bounded(1);
        let closer = thread::spawn(move || {
            transport.disconnect();
            let _ = done_tx.send(transport.state());
        });
        assert_eq!(
            done_rx.recv_timeout(Duration::from_secs(5)),
            Ok(TransportState::Closed)
        );
        closer.join().unwrap();
        server.join().unwrap();
        drop(in_rx);
    }

    #[test]
    fn peer_close_frame_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut ws = tungstenite::accept(stream).unwrap();
            ws.send(Message::Text("STATUS".into())).unwrap();
            ws.close(None).unwrap();
            while ws.read().is_ok() {}
        });

        let (in_tx, in_rx) = bounded(8);
        let mut transport = RelayTransport::new(in_tx);
        transport
            .connect(&format!("ws://{addr}/ws/"), &RelayReply::Handshake)
            .unwrap();

        let first = in_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(first, InboundMsg::Text(ref t) if t == "STATUS"));
        let second = in_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(second, InboundMsg::PeerClosed));

        server.join().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while transport.state() != TransportState::Closed && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[test]
    fn connect_failure_leaves_transport_closed() {
        let (in_tx, _in_rx) = bounded(4);
        let mut transport = RelayTransport::new(in_tx);
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = transport.connect(&format!("ws://{addr}/ws/"), &RelayReply::Handshake);
        assert!(matches!(err, Err(TransportError::Connect(_))));
        assert_eq!(transport.state(), TransportState::Closed);
        assert!(matches!(
            transport.send(RelayReply::Status { ready: false }),
            Err(TransportError::NotOpen)
        ));
    }
}
