// src/kmsg.rs

//! Log output for generator context.
//!
//! systemd runs generators before journald is up, so stderr is usually
//! lost; `/dev/kmsg` is the only reliable sink. Each formatted event is
//! buffered and written to kmsg as a single record (the kernel treats
//! every `write(2)` as one message). When kmsg cannot be opened, or
//! kmsg logging is disabled, events go to stderr instead.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::Mutex;

use tracing_subscriber::fmt::MakeWriter;

const KMSG_PREFIX: &[u8] = b"<6>quadgen: ";

pub struct KmsgWriter {
    kmsg: Option<Mutex<File>>,
}

impl KmsgWriter {
    pub fn new(use_kmsg: bool) -> KmsgWriter {
        let kmsg = if use_kmsg {
            OpenOptions::new()
                .write(true)
                .open("/dev/kmsg")
                .ok()
                .map(Mutex::new)
        } else {
            None
        };
        KmsgWriter { kmsg }
    }
}

pub enum Writer<'a> {
    Kmsg {
        file: &'a Mutex<File>,
        buf: Vec<u8>,
    },
    Stderr(io::Stderr),
}

impl io::Write for Writer<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            Writer::Kmsg { buf, .. } => {
                buf.extend_from_slice(data);
                Ok(data.len())
            }
            Writer::Stderr(err) => err.write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Writer::Kmsg { .. } => Ok(()),
            Writer::Stderr(err) => err.flush(),
        }
    }
}

impl Drop for Writer<'_> {
    fn drop(&mut self) {
        if let Writer::Kmsg { file, buf } = self {
            if buf.is_empty() {
                return;
            }
            let mut record = Vec::with_capacity(KMSG_PREFIX.len() + buf.len());
            record.extend_from_slice(KMSG_PREFIX);
            // kmsg records are newline-terminated by the write itself
            record.extend_from_slice(buf.strip_suffix(b"\n").unwrap_or(buf));
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(&record);
            }
        }
    }
}

impl<'a> MakeWriter<'a> for KmsgWriter {
    type Writer = Writer<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        match &self.kmsg {
            Some(file) => Writer::Kmsg {
                file,
                buf: Vec::new(),
            },
            None => Writer::Stderr(io::stderr()),
        }
    }
}
