use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::thread;
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

pub const INBOUND_FRAME_CAP: usize = 1_048_576;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub origin: String,
    pub data: Value,
}

impl InboundMessage {
    pub fn new(origin: impl Into<String>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }
}

pub fn reader_loop<R, F>(reader: &mut R, mut on_message: F) -> io::Result<()>
where
    R: Read,
    F: FnMut(InboundMessage) -> bool,
{
    loop {
        let Some(payload) = read_frame(reader, INBOUND_FRAME_CAP)? else {
            return Ok(());
        };

        match decode_inbound(&payload) {
            Ok(message) => {
                if !on_message(message) {
                    return Ok(());
                }
            }
            Err(err) => warn!(error = %err, bytes = payload.len(), "undecodable inbound frame"),
        }
    }
}

pub fn spawn_inbound_reader<R>(
    mut reader: R,
    tx: Sender<InboundMessage>,
) -> thread::JoinHandle<io::Result<()>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let result = reader_loop(&mut reader, |message| {
            debug!(origin = %message.origin, "inbound frame queued");
            tx.blocking_send(message).is_ok()
        });

        match &result {
            Ok(()) => info!("inbound reader finished"),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(error = %err, "inbound stream ended mid-frame")
            }
            Err(err) => warn!(error = %err, "inbound reader terminated"),
        }

        result
    })
}

pub fn write_message(writer: &mut impl Write, message: &InboundMessage) -> io::Result<()> {
    let payload = serde_json::to_vec(message).map_err(json_error)?;
    write_frame(writer, &payload, INBOUND_FRAME_CAP)?;
    writer.flush()
}

fn decode_inbound(payload: &[u8]) -> io::Result<InboundMessage> {
    serde_json::from_slice(payload).map_err(json_error)
}

// Ok(None) only when the stream ends on a frame boundary.
fn read_frame(reader: &mut impl Read, max_payload: usize) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0_u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(truncated(format!(
                    "truncated frame header: {filled} of 4 bytes"
                )));
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} > {max_payload}"),
        ));
    }

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            truncated(format!("truncated frame: expected {len} payload bytes"))
        } else {
            err
        }
    })?;
    Ok(Some(payload))
}

fn truncated(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, message)
}

fn write_frame(writer: &mut impl Write, payload: &[u8], max_payload: usize) -> io::Result<()> {
    if payload.len() > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} > {}", payload.len(), max_payload),
        ));
    }

    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "payload exceeds u32"))?;

    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

fn json_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
