//! Startup clock check against an NTP server
//!
//! The preamble tells the model the local time, so a badly drifted clock
//! produces wrong answers to "what time is it". One SNTPv4 request is made
//! at startup; the result is only logged.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;

use crate::{Error, Result};

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const PACKET_LEN: usize = 48;

/// LI = 0, VN = 4, Mode = 3 (client)
const CLIENT_HEADER: u8 = 0x23;

/// Drift above which a warning is logged
pub const DRIFT_WARNING: Duration = Duration::from_secs(5);

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of one clock comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockReport {
    /// Server time minus local time, in seconds
    pub offset_secs: f64,
    /// Request round trip, in seconds
    pub round_trip_secs: f64,
}

impl ClockReport {
    /// Whether the local clock is off by more than [`DRIFT_WARNING`]
    #[must_use]
    pub fn is_drifted(&self) -> bool {
        self.offset_secs.abs() > DRIFT_WARNING.as_secs_f64()
    }
}

/// SNTP client for a single server
#[derive(Debug, Clone)]
pub struct ClockSync {
    server: String,
    timeout: Duration,
}

impl ClockSync {
    /// Create a checker for `server` (`host:port`)
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Compare the local clock with the server, logging the outcome
    ///
    /// Never fails; an unreachable server is logged and `None` returned.
    pub async fn check(&self) -> Option<ClockReport> {
        match tokio::time::timeout(self.timeout, self.query()).await {
            Ok(Ok(report)) => {
                if report.is_drifted() {
                    tracing::warn!(
                        server = %self.server,
                        offset_secs = report.offset_secs,
                        "local clock is off; spoken times may be wrong"
                    );
                } else {
                    tracing::info!(
                        server = %self.server,
                        offset_secs = report.offset_secs,
                        round_trip_secs = report.round_trip_secs,
                        "clock checked"
                    );
                }
                Some(report)
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %self.server, error = %e, "clock check failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    server = %self.server,
                    timeout_ms = self.timeout.as_millis(),
                    "clock check timed out"
                );
                None
            }
        }
    }

    async fn query(&self) -> Result<ClockReport> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&self.server).await?;

        let t1 = now_secs();
        socket.send(&request_packet(t1)).await?;

        let mut buf = [0u8; PACKET_LEN];
        let len = socket.recv(&mut buf).await?;
        let t4 = now_secs();

        let (t2, t3) = parse_response(&buf[..len])?;
        Ok(compute_report(t1, t2, t3, t4))
    }
}

/// Build a client request carrying `transmit` (Unix seconds)
#[must_use]
pub fn request_packet(transmit: f64) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CLIENT_HEADER;
    packet[40..48].copy_from_slice(&to_ntp(transmit).to_be_bytes());
    packet
}

/// Extract the server receive and transmit timestamps (Unix seconds)
///
/// # Errors
///
/// Returns `Error::Io` if the packet is short or is not a server reply
pub fn parse_response(packet: &[u8]) -> Result<(f64, f64)> {
    if packet.len() < PACKET_LEN {
        return Err(invalid(format!("short NTP reply ({} bytes)", packet.len())));
    }

    // Mode 4 = server
    if packet[0] & 0x07 != 4 {
        return Err(invalid(format!("unexpected NTP mode {}", packet[0] & 0x07)));
    }

    let receive = read_timestamp(&packet[32..40]);
    let transmit = read_timestamp(&packet[40..48]);
    if transmit == 0 {
        return Err(invalid("server sent zero transmit timestamp".to_string()));
    }

    Ok((from_ntp(receive), from_ntp(transmit)))
}

/// Standard SNTP offset and delay from the four timestamps
#[must_use]
pub fn compute_report(t1: f64, t2: f64, t3: f64, t4: f64) -> ClockReport {
    ClockReport {
        offset_secs: ((t2 - t1) + (t3 - t4)) / 2.0,
        round_trip_secs: (t4 - t1) - (t3 - t2),
    }
}

fn read_timestamp(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_be_bytes(raw)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn to_ntp(unix_secs: f64) -> u64 {
    let secs = unix_secs.trunc();
    let frac = ((unix_secs - secs) * 4_294_967_296.0) as u64;
    ((secs as u64 + NTP_UNIX_OFFSET) << 32) | (frac & 0xFFFF_FFFF)
}

#[allow(clippy::cast_precision_loss)]
fn from_ntp(ntp: u64) -> f64 {
    let secs = (ntp >> 32) as f64 - NTP_UNIX_OFFSET as f64;
    let frac = (ntp & 0xFFFF_FFFF) as f64 / 4_294_967_296.0;
    secs + frac
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

fn invalid(message: String) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_reply(receive: f64, transmit: f64) -> [u8; PACKET_LEN] {
        let mut packet = [0u8; PACKET_LEN];
        packet[0] = 0x24; // VN 4, mode 4
        packet[32..40].copy_from_slice(&to_ntp(receive).to_be_bytes());
        packet[40..48].copy_from_slice(&to_ntp(transmit).to_be_bytes());
        packet
    }

    #[test]
    fn test_ntp_conversion() {
        let t = 1_700_000_000.25;
        assert!((from_ntp(to_ntp(t)) - t).abs() < 1e-6);
        assert_eq!(to_ntp(0.0) >> 32, NTP_UNIX_OFFSET);
    }

    #[test]
    fn test_request_packet() {
        let packet = request_packet(1_700_000_000.0);
        assert_eq!(packet[0], 0x23);
        assert!(packet[1..40].iter().all(|b| *b == 0));
        assert_ne!(read_timestamp(&packet[40..48]), 0);
    }

    #[test]
    fn test_parse_response() {
        let packet = server_reply(1_700_000_010.0, 1_700_000_010.5);
        let (t2, t3) = parse_response(&packet).unwrap();
        assert!((t2 - 1_700_000_010.0).abs() < 1e-6);
        assert!((t3 - 1_700_000_010.5).abs() < 1e-6);
    }

    #[test]
    fn test_parse_response_rejects_bad_packets() {
        assert!(parse_response(&[0u8; 12]).is_err());

        let mut client_mode = server_reply(1.0, 2.0);
        client_mode[0] = CLIENT_HEADER;
        assert!(parse_response(&client_mode).is_err());

        let mut zero = server_reply(1.0, 2.0);
        zero[40..48].fill(0);
        assert!(parse_response(&zero).is_err());
    }

    #[test]
    fn test_offset_computation() {
        // Server is 10 s ahead, 0.2 s each way
        let report = compute_report(100.0, 110.2, 110.3, 100.5);
        assert!((report.offset_secs - 10.0).abs() < 1e-9);
        assert!((report.round_trip_secs - 0.4).abs() < 1e-9);
        assert!(report.is_drifted());

        let report = compute_report(100.0, 100.1, 100.1, 100.2);
        assert!(!report.is_drifted());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_not_an_error() {
        // Nothing listens on the discard port of localhost
        let sync = ClockSync::new("127.0.0.1:9").with_timeout(Duration::from_millis(200));
        assert!(sync.check().await.is_none());
    }

    #[tokio::test]
    async fn test_check_against_local_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; PACKET_LEN];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            let now = now_secs() + 30.0;
            server.send_to(&server_reply(now, now), peer).await.unwrap();
        });

        let report = ClockSync::new(addr.to_string()).check().await.unwrap();
        assert!((report.offset_secs - 30.0).abs() < 1.0);
        assert!(report.is_drifted());
    }
}
