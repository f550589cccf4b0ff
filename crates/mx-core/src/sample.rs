//! Sample type and buffer helpers

/// Audio sample as exchanged with the audio server
pub type Sample = f32;

/// Fill buffer with silence
#[inline]
pub fn buffer_fill_with_silence(buf: &mut [Sample]) {
    buf.fill(0.0);
}

/// Copy `src` into `dst`, truncating to the shorter of the two
#[inline]
pub fn buffer_copy(dst: &mut [Sample], src: &[Sample]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}

/// Multiply buffer in place
#[inline]
pub fn buffer_apply_gain(buf: &mut [Sample], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for s in buf.iter_mut() {
        *s *= gain;
    }
}

/// `dst = src * gain`
#[inline]
pub fn buffer_copy_and_apply_gain(dst: &mut [Sample], src: &[Sample], gain: f32) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = *s * gain;
    }
}

/// Absolute peak of a buffer
#[inline]
pub fn buffer_peak(buf: &[Sample]) -> f32 {
    buf.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}

/// True when no sample is NaN or infinite
#[inline]
pub fn buffer_is_finite(buf: &[Sample]) -> bool {
    buf.iter().all(|s| s.is_finite())
}

/// Convert dB to linear gain
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Convert linear gain to dB (floored at -144 dB)
#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= 1e-7 {
        -144.0
    } else {
        20.0 * gain.log10()
    }
}
