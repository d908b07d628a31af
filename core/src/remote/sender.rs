use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{Error, Result};

use super::frame::{read_frame, write_frame};
use super::{ControlAck, ControlHello, RemoteStats, ReplyFrame, RequestFrame};

/// The client side of the remote batching extension: one persistent TCP
/// connection, handshaken once at `connect` time, carrying any number of
/// `send_wait` request/reply round trips afterwards.
pub struct RemoteSender {
    reader: Mutex<BufReader<TcpStream>>,
    writer: Mutex<BufWriter<TcpStream>>,
    signature: u64,
    pub stats: Arc<RemoteStats>,
}

impl RemoteSender {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<RemoteSender> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        let mut writer = BufWriter::new(stream.try_clone()?);
        let mut reader = BufReader::new(stream);

        write_frame(&mut writer, &serde_json::to_vec(&ControlHello)?)?;
        let ack_bytes = read_frame(&mut reader)?;
        let ack: ControlAck = serde_json::from_slice(&ack_bytes)?;
        if !ack.valid {
            return Err(Error::Malformed("remote receiver rejected control hello".into()));
        }

        Ok(RemoteSender { reader: Mutex::new(reader), writer: Mutex::new(writer), signature: ack.signature, stats: Arc::new(RemoteStats::new()) })
    }

    /// Send `mem` (the raw batch bytes for one request) with accompanying
    /// `opts`/`batchsize` metadata and block for the reply. A reply
    /// carrying a signature from a session other than the one established
    /// at `connect` time is dropped as stale (`Error::StaleSignature`) - the
    /// caller should treat this as a lost request, not valid data.
    pub fn send_wait(&self, opts: serde_json::Value, mem: &[u8], batchsize: usize) -> Result<Vec<u8>> {
        let req = RequestFrame { signature: self.signature, opts, mem: STANDARD.encode(mem), batchsize };
        let payload = serde_json::to_vec(&req)?;
        {
            let mut writer = self.writer.lock().unwrap();
            write_frame(&mut *writer, &payload)?;
        }
        self.stats.record_send(payload.len());

        let reply_bytes = {
            let mut reader = self.reader.lock().unwrap();
            read_frame(&mut *reader)?
        };
        self.stats.record_recv(reply_bytes.len());

        let reply: ReplyFrame = serde_json::from_slice(&reply_bytes)?;
        if reply.signature != self.signature {
            return Err(Error::StaleSignature);
        }
        STANDARD.decode(&reply.mem).map_err(|e| Error::Malformed(e.to_string()))
    }

    pub fn signature(&self) -> u64 {
        self.signature
    }
}
