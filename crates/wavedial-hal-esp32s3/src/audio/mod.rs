//! I2S output pipeline: raw MP3 stream bytes in, PCM out over circular DMA.
//!
//! Decode is driven straight off the network socket. The session feeds
//! whatever bytes the socket produced into a bounded compressed-data buffer
//! and pumps whole frames out of it; there is no intermediate file and no
//! lookahead, so a stalled network stalls decode and playback with it.

use esp_hal::{
    dma_buffers,
    gpio::interconnect::PeripheralOutput,
    i2s::master::{DataFormat, Error as I2sError, I2s, I2sWriteDmaTransferAsync, Standard},
    peripherals::{DMA_CH0, I2S0},
    time::Rate,
};
use log::debug;
use rmp3::{Frame, MAX_SAMPLES_PER_FRAME, RawDecoder, Sample};

/// Fixed output rate. Webradio MP3 is 44.1 kHz in practice; a stream at
/// another rate plays off-speed rather than reconfiguring I2S mid-session.
const SAMPLE_RATE_HZ: u32 = 44_100;
/// Circular DMA ring: ~93 ms of 16-bit stereo at 44.1 kHz.
const I2S_DMA_BUFFER_BYTES: usize = 16 * 1024;
/// Compressed-side buffer; the largest legal MP3 frame is ~1.4 KiB, so this
/// always holds a whole frame plus the next header.
const MP3_BUFFER_BYTES: usize = 4096;
const STAGE_BYTES: usize = 512;

#[derive(Debug)]
pub enum AudioError {
    Output(I2sError),
}

/// The I2S hardware handle plus the MP3 decoder bound to it.
///
/// The peripheral is acquired once at boot; each playback session brackets
/// its use with [`start_stream`]/[`stop_stream`], and the DMA transfer is
/// released exactly once, in `Drop`, if the pipeline ever goes away.
///
/// [`start_stream`]: Mp3Pipeline::start_stream
/// [`stop_stream`]: Mp3Pipeline::stop_stream
pub struct Mp3Pipeline {
    transfer: I2sWriteDmaTransferAsync<'static, &'static mut [u8]>,
    decoder: RawDecoder,
    mp3: [u8; MP3_BUFFER_BYTES],
    mp3_len: usize,
    pcm: [Sample; MAX_SAMPLES_PER_FRAME],
    playing: bool,
}

impl Mp3Pipeline {
    pub fn new(
        i2s: I2S0<'static>,
        dma: DMA_CH0<'static>,
        bclk: impl PeripheralOutput<'static>,
        ws: impl PeripheralOutput<'static>,
        dout: impl PeripheralOutput<'static>,
    ) -> Result<Self, AudioError> {
        let (_, _, tx_buffer, tx_descriptors) = dma_buffers!(0, I2S_DMA_BUFFER_BYTES);

        let i2s = I2s::new(
            i2s,
            Standard::Philips,
            DataFormat::Data16Channel16,
            Rate::from_hz(SAMPLE_RATE_HZ),
            dma,
        )
        .into_async();

        let i2s_tx = i2s
            .i2s_tx
            .with_bclk(bclk)
            .with_ws(ws)
            .with_dout(dout)
            .build(tx_descriptors);

        let transfer = i2s_tx
            .write_dma_circular_async(tx_buffer)
            .map_err(AudioError::Output)?;

        Ok(Self {
            transfer,
            decoder: RawDecoder::new(),
            mp3: [0; MP3_BUFFER_BYTES],
            mp3_len: 0,
            pcm: [0; MAX_SAMPLES_PER_FRAME],
            playing: false,
        })
    }

    /// Bind the decoder to a fresh stream: forget buffered bytes and any
    /// sync state from the previous station.
    pub fn start_stream(&mut self) {
        self.decoder = RawDecoder::new();
        self.mp3_len = 0;
        self.playing = true;
    }

    /// Decode liveness. Turns false once the compressed buffer fills without
    /// yielding a single frame (lost sync / not an MP3 stream) or after
    /// [`stop_stream`].
    ///
    /// [`stop_stream`]: Mp3Pipeline::stop_stream
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Free space in the compressed-side buffer; the session never reads
    /// more than this off the socket, so no stream byte is dropped.
    pub fn space(&self) -> usize {
        MP3_BUFFER_BYTES - self.mp3_len
    }

    /// Append raw stream bytes. Returns how many were accepted.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        let take = bytes.len().min(self.space());
        self.mp3[self.mp3_len..self.mp3_len + take].copy_from_slice(&bytes[..take]);
        self.mp3_len += take;
        take
    }

    /// Decode every whole frame currently buffered and push its PCM into the
    /// DMA ring, waiting for ring space as needed.
    pub async fn pump(&mut self) -> Result<(), AudioError> {
        loop {
            let decoded = self
                .decoder
                .next(&self.mp3[..self.mp3_len], &mut self.pcm)
                .map(|(frame, consumed)| match frame {
                    Frame::Audio(audio) => (consumed, audio.channels(), audio.sample_count()),
                    Frame::Other(_) => (consumed, 0, 0),
                });

            let Some((consumed, channels, samples)) = decoded else {
                if self.mp3_len == MP3_BUFFER_BYTES {
                    debug!("mp3 sync lost with a full buffer; marking stream dead");
                    self.playing = false;
                }
                return Ok(());
            };

            if consumed == 0 {
                return Ok(());
            }

            self.mp3.copy_within(consumed..self.mp3_len, 0);
            self.mp3_len -= consumed;

            if samples > 0 {
                self.emit(samples, channels as usize).await?;
            }
        }
    }

    /// End the session's use of the hardware: stop decoding and overwrite
    /// the ring with silence so it does not loop stale audio.
    pub async fn stop_stream(&mut self) {
        self.playing = false;
        self.mp3_len = 0;

        let silence = [0u8; STAGE_BYTES];
        let mut remaining = I2S_DMA_BUFFER_BYTES;
        while remaining > 0 {
            match self.transfer.push(&silence[..silence.len().min(remaining)]).await {
                Ok(written) if written > 0 => remaining = remaining.saturating_sub(written),
                _ => break,
            }
        }
    }

    async fn emit(&mut self, samples: usize, channels: usize) -> Result<(), AudioError> {
        let channels = channels.max(1);
        let mut staged = [0u8; STAGE_BYTES];
        let mut used = 0usize;

        for frame in 0..samples {
            // Mono frames drive both channels; anything beyond stereo keeps
            // its first two channels.
            let (left, right) = if channels == 1 {
                let sample = self.pcm[frame];
                (sample, sample)
            } else {
                (self.pcm[frame * channels], self.pcm[frame * channels + 1])
            };

            staged[used..used + 2].copy_from_slice(&left.to_le_bytes());
            staged[used + 2..used + 4].copy_from_slice(&right.to_le_bytes());
            used += 4;

            if used == STAGE_BYTES {
                self.push_all(&staged).await?;
                used = 0;
            }
        }

        if used > 0 {
            self.push_all(&staged[..used]).await?;
        }
        Ok(())
    }

    async fn push_all(&mut self, mut bytes: &[u8]) -> Result<(), AudioError> {
        while !bytes.is_empty() {
            let written = self.transfer.push(bytes).await.map_err(AudioError::Output)?;
            bytes = &bytes[written..];
        }
        Ok(())
    }
}
