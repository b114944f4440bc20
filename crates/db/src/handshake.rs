//! RethinkDB V1_0 connection handshake.
//!
//! Every message after the magic number is a JSON document terminated by a
//! NUL byte. A reply that does not parse as JSON is a plain-text error from
//! the server.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::ConnectionError;
use crate::scram::ScramClient;
use crate::Credentials;

/// `VersionDummy::Version::V1_0`, sent little-endian.
pub const V1_0_MAGIC: u32 = 0x34c2_bdc3;
pub const PROTOCOL_VERSION: i64 = 0;
pub const AUTH_METHOD: &str = "SCRAM-SHA-256";

const MAX_MESSAGE_LEN: u64 = 64 * 1024;
const AUTH_ERROR_CODES: std::ops::RangeInclusive<i64> = 10..=20;

#[derive(Debug, Serialize)]
struct ClientFirst<'a> {
    protocol_version: i64,
    authentication_method: &'a str,
    authentication: &'a str,
}

#[derive(Debug, Serialize)]
struct ClientFinal<'a> {
    authentication: &'a str,
}

#[derive(Debug, Deserialize)]
struct ServerReply {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    min_protocol_version: Option<i64>,
    #[serde(default)]
    max_protocol_version: Option<i64>,
    #[serde(default)]
    server_version: Option<String>,
    #[serde(default)]
    authentication: Option<String>,
}

impl ServerReply {
    fn into_result(self) -> Result<Self, ConnectionError> {
        if self.success {
            return Ok(self);
        }
        let message = self
            .error
            .unwrap_or_else(|| "server reported failure without a message".to_string());
        match self.error_code {
            Some(code) if AUTH_ERROR_CODES.contains(&code) => Err(ConnectionError::Auth(message)),
            Some(code) => Err(ConnectionError::Server { code, message }),
            None => Err(ConnectionError::protocol(message)),
        }
    }

    fn authentication(&self) -> Result<&str, ConnectionError> {
        self.authentication
            .as_deref()
            .ok_or_else(|| ConnectionError::protocol("reply is missing the authentication field"))
    }
}

/// Run the handshake over an established stream and return the server version.
pub async fn perform<S>(
    stream: &mut BufReader<S>,
    credentials: &Credentials,
) -> Result<String, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let scram = ScramClient::new(credentials.user(), credentials.password());
    let client_first = scram.client_first();

    let mut opening = V1_0_MAGIC.to_le_bytes().to_vec();
    opening.extend(encode(&ClientFirst {
        protocol_version: PROTOCOL_VERSION,
        authentication_method: AUTH_METHOD,
        authentication: &client_first,
    })?);
    send(stream, &opening).await?;

    let hello = read_reply(stream).await?;
    let min = hello.min_protocol_version.unwrap_or(PROTOCOL_VERSION);
    let max = hello.max_protocol_version.unwrap_or(PROTOCOL_VERSION);
    if !(min..=max).contains(&PROTOCOL_VERSION) {
        return Err(ConnectionError::protocol(format!(
            "server supports protocol versions {min}..={max}, client speaks {PROTOCOL_VERSION}"
        )));
    }
    let server_version = hello
        .server_version
        .unwrap_or_else(|| "unknown".to_string());

    let challenge = read_reply(stream).await?;
    let server_first = challenge.authentication()?.to_string();
    // Key derivation is CPU-bound; keep it off the executor so the connect
    // timeout can still fire.
    let (client_final, verifier) =
        tokio::task::spawn_blocking(move || scram.respond(&server_first))
            .await
            .map_err(|e| ConnectionError::protocol(format!("key derivation failed: {e}")))??;
    send(
        stream,
        &encode(&ClientFinal {
            authentication: &client_final,
        })?,
    )
    .await?;

    let outcome = read_reply(stream).await?;
    verifier.verify(outcome.authentication()?)?;

    Ok(server_version)
}

fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ConnectionError> {
    let mut bytes = serde_json::to_vec(message)
        .map_err(|e| ConnectionError::protocol(format!("failed to encode handshake message: {e}")))?;
    bytes.push(0);
    Ok(bytes)
}

async fn send<S>(stream: &mut BufReader<S>, bytes: &[u8]) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let writer = stream.get_mut();
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_reply<S>(stream: &mut BufReader<S>) -> Result<ServerReply, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let message = read_message(stream).await?;
    let text = std::str::from_utf8(&message)
        .map_err(|_| ConnectionError::protocol("handshake reply is not valid UTF-8"))?;

    match serde_json::from_str::<ServerReply>(text) {
        Ok(reply) => reply.into_result(),
        Err(_) => Err(ConnectionError::protocol(format!(
            "server rejected handshake: {}",
            text.trim()
        ))),
    }
}

/// Read one NUL-terminated message, without the terminator.
pub async fn read_message<R>(reader: &mut BufReader<R>) -> Result<Vec<u8>, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    (&mut *reader)
        .take(MAX_MESSAGE_LEN + 1)
        .read_until(0, &mut buf)
        .await?;

    match buf.last() {
        Some(0) => {
            buf.pop();
            Ok(buf)
        }
        _ if buf.len() as u64 > MAX_MESSAGE_LEN => Err(ConnectionError::protocol(format!(
            "handshake message exceeds {MAX_MESSAGE_LEN} bytes"
        ))),
        _ => Err(ConnectionError::protocol(
            "connection closed before the end of a handshake message",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    async fn read_raw(server: &mut BufReader<DuplexStream>) -> serde_json::Value {
        let bytes = read_message(server).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn write_raw(server: &mut BufReader<DuplexStream>, body: &str) {
        let inner = server.get_mut();
        inner.write_all(body.as_bytes()).await.unwrap();
        inner.write_all(&[0]).await.unwrap();
    }

    #[tokio::test]
    async fn read_message_strips_terminator() {
        let (mut tx, rx) = duplex(64);
        tx.write_all(b"{\"success\":true}\0rest").await.unwrap();
        let mut reader = BufReader::new(rx);
        let message = read_message(&mut reader).await.unwrap();
        assert_eq!(message, b"{\"success\":true}");
    }

    #[tokio::test]
    async fn read_message_reports_early_eof() {
        let (mut tx, rx) = duplex(64);
        tx.write_all(b"HTTP/1.1 400 Bad Request\r\n").await.unwrap();
        drop(tx);
        let mut reader = BufReader::new(rx);
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Protocol(_)));
    }

    #[tokio::test]
    async fn read_message_rejects_oversized_messages() {
        let (mut tx, rx) = duplex(1024);
        let writer = tokio::spawn(async move {
            let chunk = vec![b'x'; 1024];
            for _ in 0..=(MAX_MESSAGE_LEN / 1024) {
                if tx.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });
        let mut reader = BufReader::new(rx);
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("exceeds"));
        drop(reader);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn opening_message_carries_magic_and_scram_first() {
        let (client, server) = duplex(4096);
        let mut server = BufReader::new(server);

        let handshake = tokio::spawn(async move {
            let mut client = BufReader::new(client);
            perform(&mut client, &Credentials::default()).await
        });

        let mut magic = [0u8; 4];
        server.read_exact(&mut magic).await.unwrap();
        assert_eq!(u32::from_le_bytes(magic), V1_0_MAGIC);

        let first = read_raw(&mut server).await;
        assert_eq!(first["protocol_version"], 0);
        assert_eq!(first["authentication_method"], "SCRAM-SHA-256");
        assert!(first["authentication"]
            .as_str()
            .unwrap()
            .starts_with("n,,n=admin,r="));

        write_raw(
            &mut server,
            r#"{"success":false,"error":"Unknown user","error_code":17}"#,
        )
        .await;

        let err = handshake.await.unwrap().unwrap_err();
        assert!(matches!(err, ConnectionError::Auth(ref m) if m == "Unknown user"));
    }

    #[tokio::test]
    async fn non_auth_failure_is_server_error() {
        let (client, server) = duplex(4096);
        let mut server = BufReader::new(server);

        let handshake = tokio::spawn(async move {
            let mut client = BufReader::new(client);
            perform(&mut client, &Credentials::default()).await
        });

        let mut magic = [0u8; 4];
        server.read_exact(&mut magic).await.unwrap();
        read_raw(&mut server).await;
        write_raw(
            &mut server,
            r#"{"success":false,"error":"too many connections","error_code":3}"#,
        )
        .await;

        let err = handshake.await.unwrap().unwrap_err();
        assert!(matches!(err, ConnectionError::Server { code: 3, .. }));
    }

    #[tokio::test]
    async fn plain_text_reply_is_protocol_error() {
        let (client, server) = duplex(4096);
        let mut server = BufReader::new(server);

        let handshake = tokio::spawn(async move {
            let mut client = BufReader::new(client);
            perform(&mut client, &Credentials::default()).await
        });

        let mut magic = [0u8; 4];
        server.read_exact(&mut magic).await.unwrap();
        read_raw(&mut server).await;
        write_raw(&mut server, "ERROR: Received an unsupported protocol version.").await;

        let err = handshake.await.unwrap().unwrap_err();
        assert_eq!(
            err.to_string(),
            "protocol error: server rejected handshake: ERROR: Received an unsupported protocol version."
        );
    }

    #[tokio::test]
    async fn unsupported_protocol_range_is_rejected() {
        let (client, server) = duplex(4096);
        let mut server = BufReader::new(server);

        let handshake = tokio::spawn(async move {
            let mut client = BufReader::new(client);
            perform(&mut client, &Credentials::default()).await
        });

        let mut magic = [0u8; 4];
        server.read_exact(&mut magic).await.unwrap();
        read_raw(&mut server).await;
        write_raw(
            &mut server,
            r#"{"success":true,"min_protocol_version":1,"max_protocol_version":2,"server_version":"9.9.9"}"#,
        )
        .await;

        let err = handshake.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("protocol versions 1..=2"));
    }
}
