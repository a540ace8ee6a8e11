//! Media playback control.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{MediaError, Result};

/// Playback backend driven by media-control intents.
pub trait MediaBackend: Send + Sync {
    fn resume(&self) -> bool;
    fn pause(&self) -> bool;
    fn next(&self) -> bool;
    fn previous(&self) -> bool;
    fn stop(&self) -> bool;
}

/// Music Player Daemon backend; one short TCP session per command.
pub struct MpdBackend {
    host: String,
    port: u16,
    timeout: Duration,
}

impl MpdBackend {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    fn command(&self, cmd: &str) -> Result<()> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| MediaError::Playback(format!("cannot resolve {}", self.host)))?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = stream;

        let mut line = String::new();
        reader.read_line(&mut line)?;
        if !line.starts_with("OK MPD") {
            return Err(MediaError::Playback(format!("unexpected greeting: {}", line.trim())));
        }

        writer.write_all(format!("{cmd}\n").as_bytes())?;
        writer.flush()?;

        line.clear();
        reader.read_line(&mut line)?;
        let reply = line.trim();
        if reply == "OK" {
            debug!(cmd, "mpd command ok");
            Ok(())
        } else {
            Err(MediaError::Playback(reply.to_string()))
        }
    }

    fn run(&self, cmd: &str) -> bool {
        match self.command(cmd) {
            Ok(()) => true,
            Err(e) => {
                warn!(cmd, error = %e, "mpd command failed");
                false
            }
        }
    }
}

impl MediaBackend for MpdBackend {
    fn resume(&self) -> bool {
        self.run("play")
    }

    fn pause(&self) -> bool {
        self.run("pause 1")
    }

    fn next(&self) -> bool {
        self.run("next")
    }

    fn previous(&self) -> bool {
        self.run("previous")
    }

    fn stop(&self) -> bool {
        self.run("stop")
    }
}
