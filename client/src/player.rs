use log::{debug, info};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{interval, MissedTickBehavior};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// How a simulated player session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub check_ins: u32,
    pub echoed_bytes: usize,
}

/// Connects to the game port and sends a check-in line every `every` until
/// the server closes the connection or `limit` check-ins were sent.
/// Periods under a millisecond are raised to one.
///
/// Echoed bytes are handed to `on_echo` as they arrive.
pub async fn play<F>(
    server: SocketAddr,
    player: &str,
    every: Duration,
    limit: Option<u32>,
    mut on_echo: F,
) -> io::Result<SessionSummary>
where
    F: FnMut(&[u8]),
{
    let stream = TcpStream::connect(server).await?;
    info!("Connected to match at {}", server);
    let (mut reader, mut writer) = stream.into_split();

    let line = format!("Player checking in: {}\n", player);
    // interval() panics on a zero period
    let mut ticker = interval(every.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut summary = SessionSummary {
        check_ins: 0,
        echoed_bytes: 0,
    };
    let mut buf = [0u8; 256];

    let done = |summary: &SessionSummary| {
        limit == Some(summary.check_ins)
            && summary.echoed_bytes >= line.len() * summary.check_ins as usize
    };

    while !done(&summary) {
        tokio::select! {
            _ = ticker.tick(), if limit.map_or(true, |limit| summary.check_ins < limit) => {
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    debug!("write failed: {}", e);
                    break;
                }
                summary.check_ins += 1;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(len) => {
                    summary.echoed_bytes += len;
                    on_echo(&buf[..len]);
                }
                Err(e) => {
                    debug!("read failed: {}", e);
                    break;
                }
            },
        }
    }

    info!("Match ended after {} check-ins", summary.check_ins);
    Ok(summary)
}
