use core::fmt::Debug;

use embassy_net::{Stack, dns::DnsQueryType, tcp::TcpSocket};
use embassy_time::{Duration as EmbassyDuration, Timer, WithTimeout};
use embedded_io_async::Write as _;
use esp_hal::{system::software_reset, time::Instant};
use log::info;
use wavedial_core::{
    http,
    input::DialInput,
    selection::SelectionStore,
    session::{POLL_INTERVAL_MS, RESET_WRITE_SETTLE_MS, SessionOutcome, SessionStep, Tuner},
    station::Station,
};
use wavedial_hal_esp32s3::audio::Mp3Pipeline;

/// Connect + read timeout; a silent or hung server must not block forever.
const STREAM_TIMEOUT_SECS: u64 = 10;
const SOCKET_RX_BYTES: usize = 4096;
const SOCKET_TX_BYTES: usize = 512;
const STREAM_CHUNK_BYTES: usize = 2048;

#[derive(Debug, Clone, Copy)]
enum SessionFault {
    DnsLookup,
    Connect,
    Request,
    Headers,
}

/// One playback attempt, end to end. Every failure inside is converted to
/// an outcome here; nothing escapes to the main loop as a raw fault.
pub(super) async fn run_session<D, S>(
    stack: Stack<'_>,
    station: &Station,
    tuner: &mut Tuner,
    dial: &mut D,
    store: &mut S,
    pipeline: &mut Mp3Pipeline,
) -> SessionOutcome
where
    D: DialInput,
    D::Error: Debug,
    S: SelectionStore,
    S::Error: Debug,
{
    info!(
        "station: {} ({}:{}{})",
        station.name, station.host, station.port, station.path
    );

    let mut rx_buffer = [0u8; SOCKET_RX_BYTES];
    let mut tx_buffer = [0u8; SOCKET_TX_BYTES];
    let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
    socket.set_timeout(Some(EmbassyDuration::from_secs(STREAM_TIMEOUT_SECS)));

    let outcome = match drive(stack, &mut socket, station, tuner, dial, store, pipeline).await {
        Ok(outcome) => outcome,
        Err(fault) => {
            info!("session failed: {fault:?}");
            SessionOutcome::Failed
        }
    };

    // Drain order regardless of why the session ended: audio output first,
    // then the socket.
    pipeline.stop_stream().await;
    socket.abort();

    outcome
}

async fn drive<D, S>(
    stack: Stack<'_>,
    socket: &mut TcpSocket<'_>,
    station: &Station,
    tuner: &mut Tuner,
    dial: &mut D,
    store: &mut S,
    pipeline: &mut Mp3Pipeline,
) -> Result<SessionOutcome, SessionFault>
where
    D: DialInput,
    D::Error: Debug,
    S: SelectionStore,
    S::Error: Debug,
{
    let address = stack
        .dns_query(station.host.as_str(), DnsQueryType::A)
        .await
        .ok()
        .and_then(|addresses| addresses.first().copied())
        .ok_or(SessionFault::DnsLookup)?;

    socket
        .connect((address, station.port))
        .with_timeout(EmbassyDuration::from_secs(STREAM_TIMEOUT_SECS))
        .await
        .map_err(|_| SessionFault::Connect)?
        .map_err(|_| SessionFault::Connect)?;

    let request = http::format_request(station.host.as_str(), station.path.as_str())
        .map_err(|_| SessionFault::Request)?;
    socket
        .write_all(request.as_bytes())
        .await
        .map_err(|_| SessionFault::Request)?;

    match http::skip_response_headers(socket).await {
        Ok(()) => {}
        Err(http::StreamError::ClosedBeforeBody) => {
            info!("stream closed before the media body");
            return Err(SessionFault::Headers);
        }
        Err(http::StreamError::Io(err)) => {
            info!("header skip failed: {err:?}");
            return Err(SessionFault::Headers);
        }
    }

    pipeline.start_stream();
    // Baseline before the first poll: the dial position must read as the
    // station just resumed, or a stale count would register as a switch.
    tuner.sync_baseline(dial);
    info!(">>> playing {} <<<", station.name);

    let started = Instant::now();
    let mut clock = || started.elapsed().as_millis();

    let mut chunk = [0u8; STREAM_CHUNK_BYTES];
    loop {
        match tuner.step(pipeline.is_playing(), dial, store, &mut clock) {
            SessionStep::Continue => {}
            SessionStep::Finished(outcome) => return Ok(outcome),
            SessionStep::HardReset => {
                info!("hard reset: restarting on station 0");
                Timer::after_millis(RESET_WRITE_SETTLE_MS).await;
                software_reset();
            }
        }

        let want = pipeline.space().min(chunk.len());
        if want > 0 {
            match socket.read(&mut chunk[..want]).await {
                Ok(0) => {
                    info!("stream closed by peer");
                    return Ok(SessionOutcome::Failed);
                }
                Ok(read) => {
                    pipeline.feed(&chunk[..read]);
                }
                Err(err) => {
                    info!("stream read failed: {err:?}");
                    return Ok(SessionOutcome::Failed);
                }
            }
        }

        if let Err(err) = pipeline.pump().await {
            info!("audio output fault: {err:?}");
            return Ok(SessionOutcome::Failed);
        }

        Timer::after_millis(POLL_INTERVAL_MS).await;
    }
}
