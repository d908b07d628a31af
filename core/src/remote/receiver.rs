use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::Result;

use super::frame::{read_frame, write_frame};
use super::{ControlAck, ControlHello, RemoteStats, ReplyFrame, RequestFrame};

/// One inbound request, still bound to the connection it arrived on so its
/// reply can be routed back to the right client with the right session
/// signature.
pub struct IncomingRequest {
    pub opts: serde_json::Value,
    pub mem: Vec<u8>,
    pub batchsize: usize,
    signature: u64,
    writer: Arc<Mutex<BufWriter<TcpStream>>>,
    stats: Arc<RemoteStats>,
}

impl IncomingRequest {
    pub fn reply(self, mem: &[u8]) -> Result<()> {
        let frame = ReplyFrame { signature: self.signature, mem: STANDARD.encode(mem) };
        let payload = serde_json::to_vec(&frame)?;
        {
            let mut writer = self.writer.lock().unwrap();
            write_frame(&mut *writer, &payload)?;
        }
        self.stats.record_send(payload.len());
        Ok(())
    }
}

/// The server side of the remote batching extension: one thread accepts
/// connections, one more per accepted connection handshakes and then reads
/// requests, forwarding each to a single shared inbound queue that
/// [`RemoteReceiver::recv`] drains.
pub struct RemoteReceiver {
    local_addr: SocketAddr,
    inbound_rx: Receiver<IncomingRequest>,
    pub stats: Arc<RemoteStats>,
}

impl RemoteReceiver {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<RemoteReceiver> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let (inbound_tx, inbound_rx) = unbounded();
        let stats = Arc::new(RemoteStats::new());
        let next_signature = Arc::new(AtomicU64::new(1));

        let accept_stats = stats.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let inbound_tx = inbound_tx.clone();
                let stats = accept_stats.clone();
                let signature = next_signature.fetch_add(1, Ordering::Relaxed);
                thread::spawn(move || {
                    let _ = handle_connection(stream, signature, local_addr.port(), inbound_tx, stats);
                });
            }
        });

        Ok(RemoteReceiver { local_addr, inbound_rx, stats })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block for the next inbound request from any connected client.
    pub fn recv(&self) -> Option<IncomingRequest> {
        self.inbound_rx.recv().ok()
    }
}

fn handle_connection(
    stream: TcpStream,
    signature: u64,
    local_port: u16,
    inbound_tx: Sender<IncomingRequest>,
    stats: Arc<RemoteStats>,
) -> Result<()> {
    stream.set_nodelay(true).ok();
    let mut reader = BufReader::new(stream.try_clone()?);
    let writer = Arc::new(Mutex::new(BufWriter::new(stream)));

    let hello_bytes = read_frame(&mut reader)?;
    let _hello: ControlHello = serde_json::from_slice(&hello_bytes)?;
    let ack = ControlAck { valid: true, signature, port: vec![local_port] };
    {
        let mut w = writer.lock().unwrap();
        write_frame(&mut *w, &serde_json::to_vec(&ack)?)?;
    }

    loop {
        let req_bytes = match read_frame(&mut reader) {
            Ok(b) => b,
            Err(_) => break,
        };
        stats.record_recv(req_bytes.len());
        let req: RequestFrame = match serde_json::from_slice(&req_bytes) {
            Ok(r) => r,
            Err(_) => break,
        };
        let mem = match STANDARD.decode(&req.mem) {
            Ok(m) => m,
            Err(_) => break,
        };
        let incoming =
            IncomingRequest { opts: req.opts, mem, batchsize: req.batchsize, signature: req.signature, writer: writer.clone(), stats: stats.clone() };
        if inbound_tx.send(incoming).is_err() {
            break;
        }
    }
    Ok(())
}
