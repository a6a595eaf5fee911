use mp3lame_encoder::{max_required_buffer_size, Builder, FlushNoGap, MonoPcm};

/// LAME needs at most this much room to flush its last frames.
const FLUSH_BUFFER_SIZE: usize = 7200;

/// Encode mono 16-bit PCM as an MP3 byte buffer.
///
/// LAME picks the output rate, resampling inputs it cannot store directly.
pub fn encode_mp3(pcm: &[i16], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let mut builder = Builder::new().ok_or_else(|| anyhow::anyhow!("mp3 encoder init failed"))?;
    builder
        .set_num_channels(1)
        .map_err(|e| anyhow::anyhow!("mp3 channels err: {e:?}"))?;
    builder
        .set_sample_rate(sample_rate)
        .map_err(|e| anyhow::anyhow!("mp3 sample rate err: {e:?}"))?;
    let mut encoder = builder
        .build()
        .map_err(|e| anyhow::anyhow!("mp3 encoder build err: {e:?}"))?;

    let mut out = Vec::with_capacity(max_required_buffer_size(pcm.len()));
    encoder
        .encode_to_vec(MonoPcm(pcm), &mut out)
        .map_err(|e| anyhow::anyhow!("mp3 encode err: {e:?}"))?;

    out.reserve(FLUSH_BUFFER_SIZE);
    encoder
        .flush_to_vec::<FlushNoGap>(&mut out)
        .map_err(|e| anyhow::anyhow!("mp3 flush err: {e:?}"))?;

    Ok(out)
}
