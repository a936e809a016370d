use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use mailfeed_error::MailError;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const IO_TIMEOUT: Duration = Duration::from_secs(60);

pub enum Transport {
    Plain(TcpStream),
    Tls(native_tls::TlsStream<TcpStream>),
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf),
            Self::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.write(buf),
            Self::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => s.flush(),
            Self::Tls(s) => s.flush(),
        }
    }
}

pub struct Pop3Client<S: Read + Write> {
    stream: BufReader<S>,
}

impl Pop3Client<Transport> {
    pub fn connect(host: &str, port: u16, secure: bool) -> Result<Self, MailError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| MailError::connection(format!("resolve {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| MailError::connection(format!("no address for {host}:{port}")))?;
        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| MailError::connection(format!("POP3 connect {host}:{port}: {e}")))?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))
            .map_err(|e| MailError::connection(format!("set read timeout: {e}")))?;
        tcp.set_write_timeout(Some(IO_TIMEOUT))
            .map_err(|e| MailError::connection(format!("set write timeout: {e}")))?;

        let transport = if secure {
            let tls = native_tls::TlsConnector::builder()
                .build()
                .map_err(|e| MailError::connection(format!("TLS init: {e}")))?;
            let stream = tls
                .connect(host, tcp)
                .map_err(|e| MailError::connection(format!("TLS handshake {host}: {e}")))?;
            Transport::Tls(stream)
        } else {
            Transport::Plain(tcp)
        };

        let mut client = Self {
            stream: BufReader::new(transport),
        };
        let greeting = client.read_status_line().map_err(|e| match e {
            MailError::Protocol(msg) => MailError::connection(format!("POP3 greeting: {msg}")),
            other => other,
        })?;
        debug!(greeting = %greeting, "POP3 server ready");
        Ok(client)
    }
}

impl<S: Read + Write> Pop3Client<S> {
    pub fn login(&mut self, username: &str, password: &str) -> Result<(), MailError> {
        self.auth_step(&format!("USER {username}"), "POP3 USER")?;
        self.auth_step(&format!("PASS {password}"), "POP3 PASS")
    }

    pub fn stat(&mut self) -> Result<(u32, u64), MailError> {
        let reply = self.command_ok("STAT", "POP3 STAT")?;
        let mut parts = reply.split_whitespace();
        let count = parts
            .next()
            .and_then(|w| w.parse().ok())
            .ok_or_else(|| MailError::protocol(format!("POP3 STAT: bad reply: {reply}")))?;
        let octets = parts.next().and_then(|w| w.parse().ok()).unwrap_or(0);
        Ok((count, octets))
    }

    pub fn list(&mut self) -> Result<Vec<u32>, MailError> {
        self.send("LIST")?;
        self.read_status_line()
            .map_err(|e| wrap_protocol(e, "POP3 LIST"))?;
        let lines = self.read_multiline_text()?;
        let mut ids = Vec::with_capacity(lines.len());
        for line in &lines {
            let id = line
                .split_whitespace()
                .next()
                .and_then(|w| w.parse().ok())
                .ok_or_else(|| MailError::protocol(format!("POP3 LIST: bad entry: {line}")))?;
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn retr(&mut self, msg: u32) -> Result<Vec<u8>, MailError> {
        self.send(&format!("RETR {msg}"))?;
        self.read_status_line()
            .map_err(|e| wrap_protocol(e, "POP3 RETR"))?;
        self.read_multiline_bytes()
    }

    pub fn dele(&mut self, msg: u32) -> Result<(), MailError> {
        self.command_ok(&format!("DELE {msg}"), "POP3 DELE")
            .map(|_| ())
    }

    // Pending DELEs only take effect once the server acknowledges QUIT.
    pub fn quit(&mut self) -> Result<(), MailError> {
        self.command_ok("QUIT", "POP3 QUIT").map(|_| ())
    }

    fn auth_step(&mut self, command: &str, label: &str) -> Result<(), MailError> {
        self.send(command)?;
        match self.read_status_line() {
            Ok(_) => Ok(()),
            Err(MailError::Protocol(msg)) => Err(MailError::auth(format!("{label}: {msg}"))),
            Err(other) => Err(other),
        }
    }

    fn command_ok(&mut self, command: &str, context: &str) -> Result<String, MailError> {
        self.send(command)?;
        self.read_status_line()
            .map_err(|e| wrap_protocol(e, context))
    }

    fn send(&mut self, command: &str) -> Result<(), MailError> {
        let writer = self.stream.get_mut();
        writer
            .write_all(command.as_bytes())
            .and_then(|()| writer.write_all(b"\r\n"))
            .and_then(|()| writer.flush())
            .map_err(|e| MailError::connection(format!("POP3 write: {e}")))
    }

    fn read_status_line(&mut self) -> Result<String, MailError> {
        let line = self.read_line()?;
        if let Some(rest) = line.strip_prefix("+OK") {
            return Ok(rest.trim().to_string());
        }
        if let Some(rest) = line.strip_prefix("-ERR") {
            return Err(MailError::protocol(rest.trim().to_string()));
        }
        Err(MailError::protocol(format!("malformed reply: {line}")))
    }

    fn read_line(&mut self) -> Result<String, MailError> {
        let mut line = String::new();
        let n = self
            .stream
            .read_line(&mut line)
            .map_err(|e| MailError::connection(format!("POP3 read: {e}")))?;
        if n == 0 {
            return Err(MailError::connection("POP3: connection closed by server"));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    fn read_multiline_text(&mut self) -> Result<Vec<String>, MailError> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == "." {
                return Ok(lines);
            }
            match line.strip_prefix('.') {
                Some(stripped) => lines.push(stripped.to_string()),
                None => lines.push(line),
            }
        }
    }

    fn read_multiline_bytes(&mut self) -> Result<Vec<u8>, MailError> {
        let mut body = Vec::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = self
                .stream
                .read_until(b'\n', &mut line)
                .map_err(|e| MailError::connection(format!("POP3 read: {e}")))?;
            if n == 0 {
                return Err(MailError::connection("POP3: connection closed mid-message"));
            }
            if line == b".\r\n" || line == b".\n" {
                return Ok(body);
            }
            if line.first() == Some(&b'.') {
                body.extend_from_slice(&line[1..]);
            } else {
                body.extend_from_slice(&line);
            }
        }
    }
}

fn wrap_protocol(err: MailError, context: &str) -> MailError {
    match err {
        MailError::Protocol(msg) => MailError::protocol(format!("{context}: {msg}")),
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use super::*;

    struct Script {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn client(input: &[u8]) -> Pop3Client<Script> {
        Pop3Client {
            stream: BufReader::new(Script {
                input: Cursor::new(input.to_vec()),
                written: Vec::new(),
            }),
        }
    }

    fn written(client: &Pop3Client<Script>) -> String {
        String::from_utf8(client.stream.get_ref().written.clone()).unwrap()
    }

    #[test]
    fn status_line_ok_and_err() {
        let mut c = client(b"+OK 2 320\r\n-ERR no such message\r\n");
        assert_eq!(c.read_status_line().unwrap(), "2 320");
        let err = c.read_status_line().unwrap_err();
        assert!(matches!(err, MailError::Protocol(ref msg) if msg == "no such message"));
    }

    #[test]
    fn stat_parses_count_and_octets() {
        let mut c = client(b"+OK 2 320\r\n");
        assert_eq!(c.stat().unwrap(), (2, 320));
        assert_eq!(written(&c), "STAT\r\n");
    }

    #[test]
    fn list_parses_message_numbers() {
        let mut c = client(b"+OK 3 messages\r\n1 120\r\n2 200\r\n5 1024\r\n.\r\n");
        assert_eq!(c.list().unwrap(), vec![1, 2, 5]);
        assert_eq!(written(&c), "LIST\r\n");
    }

    #[test]
    fn retr_unstuffs_leading_dots() {
        let mut c =
            client(b"+OK message follows\r\nFrom: a@example.com\r\n\r\n..leading dot\r\nbody\r\n.\r\n");
        let bytes = c.retr(1).unwrap();
        assert_eq!(
            bytes,
            b"From: a@example.com\r\n\r\n.leading dot\r\nbody\r\n".to_vec()
        );
        assert_eq!(written(&c), "RETR 1\r\n");
    }

    #[test]
    fn dele_and_quit_send_commands() {
        let mut c = client(b"+OK marked\r\n+OK bye\r\n");
        c.dele(2).unwrap();
        c.quit().unwrap();
        assert_eq!(written(&c), "DELE 2\r\nQUIT\r\n");
    }

    #[test]
    fn login_maps_rejection_to_auth_error() {
        let mut c = client(b"+OK\r\n-ERR invalid password\r\n");
        let err = c.login("user", "secret").unwrap_err();
        assert!(matches!(err, MailError::Auth(ref msg) if msg.contains("invalid password")));
        assert_eq!(written(&c), "USER user\r\nPASS secret\r\n");
    }

    #[test]
    fn eof_is_a_connection_error() {
        let mut c = client(b"");
        let err = c.read_status_line().unwrap_err();
        assert!(matches!(err, MailError::Connection(_)));
    }

    #[test]
    fn malformed_reply_is_protocol_error() {
        let mut c = client(b"HELLO\r\n");
        let err = c.read_status_line().unwrap_err();
        assert!(matches!(err, MailError::Protocol(ref msg) if msg.contains("malformed")));
    }
}
